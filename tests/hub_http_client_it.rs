#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
use time::Duration;
// self
use quota_guard::{
	config::EngineConfig,
	engine::{DecisionSource, Engine, QuotaRequest},
	error::{ConfigError, Error, HubError},
	hub::{LeaseSelector, QuotaServiceClient, ReqwestHubClient, TokenInfo},
	lease::LeaseToken,
	url::Url,
};

fn hub_config(server: &MockServer) -> EngineConfig {
	let endpoint =
		Url::parse(&server.url("/hub")).expect("Mock hub endpoint should parse successfully.");

	EngineConfig::new("it").with_client_id("it-client").with_hub_endpoint(endpoint)
}

fn selector(guard: &str) -> LeaseSelector {
	LeaseSelector {
		environment: "it".into(),
		guard_name: guard.into(),
		feature_name: Some("f1".into()),
		client_id: "it-client".into(),
		..Default::default()
	}
}

#[tokio::test]
async fn handshake_then_lease_batch_feeds_the_engine() {
	let server = MockServer::start_async().await;
	let handshake = server
		.mock_async(|when, then| {
			when.method(POST).path("/hub/v1/handshake").body_includes("\"client_id\":\"it-client\"");
			then.status(204);
		})
		.await;
	let leases = server
		.mock_async(|when, then| {
			when.method(POST).path("/hub/v1/leases").body_includes("\"guard_name\":\"D1\"");
			then.status(200).header("content-type", "application/json").body(
				r#"{"leases":[{"token":"h-1","feature":"f1"},{"token":"h-2","feature":"f1"}],"duration_secs":30}"#,
			);
		})
		.await;
	let config = hub_config(&server);
	let client = ReqwestHubClient::connect(&config, "it-client")
		.await
		.expect("Handshake against the mock hub should succeed.");
	let engine = Engine::new(config).with_hub(std::sync::Arc::new(client));
	let decision = engine.check_quota(&QuotaRequest::new("D1", "f1")).await;

	assert_eq!(decision.source, DecisionSource::Network);
	assert_eq!(decision.token, Some(LeaseToken::new("h-1")));
	assert_eq!(engine.pool_snapshot("D1").map(|snapshot| snapshot.waiting), Some(1));

	handshake.assert_async().await;
	leases.assert_calls_async(1).await;
}

#[tokio::test]
async fn lease_batch_carries_duration_hint() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/hub/v1/leases");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"leases":[{"token":"h-1","feature":"f1"}],"duration_secs":30}"#);
		})
		.await;
	let client = ReqwestHubClient::from_config(&hub_config(&server))
		.expect("Client should build from a configured endpoint.");
	let batch =
		client.get_token_lease(selector("D1")).await.expect("Lease call should succeed.");

	assert_eq!(batch.duration, Some(Duration::seconds(30)));
	assert_eq!(batch.leases.len(), 1);
	assert_eq!(batch.leases[0].expires_at, None);
}

#[tokio::test]
async fn non_success_status_surfaces_as_hub_error() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/hub/v1/leases");
			then.status(503).body("hub draining");
		})
		.await;
	let client = ReqwestHubClient::from_config(&hub_config(&server))
		.expect("Client should build from a configured endpoint.");
	let err = client
		.get_token_lease(selector("D1"))
		.await
		.expect_err("A 503 response must surface as an error.");

	assert!(matches!(
		err,
		HubError::Status { status: 503, ref message } if message == "hub draining"
	));
}

#[tokio::test]
async fn malformed_body_reports_the_failing_path() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/hub/v1/leases");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"leases":[{"token":42}]}"#);
		})
		.await;
	let client = ReqwestHubClient::from_config(&hub_config(&server))
		.expect("Client should build from a configured endpoint.");
	let err = client
		.get_token_lease(selector("D1"))
		.await
		.expect_err("A malformed lease must fail to decode.");

	match err {
		HubError::Decode { path, .. } => assert!(path.starts_with("leases"), "path: {path}"),
		other => panic!("Unexpected error: {other:?}."),
	}
}

#[tokio::test]
async fn consumption_and_validation_round_trip() {
	let server = MockServer::start_async().await;
	let consumed = server
		.mock_async(|when, then| {
			when.method(POST).path("/hub/v1/leases/consumed").body_includes("\"h-1\"");
			then.status(200);
		})
		.await;
	let validate = server
		.mock_async(|when, then| {
			when.method(POST).path("/hub/v1/tokens/validate").body_includes("\"guard_name\":\"api\"");
			then.status(200).header("content-type", "application/json").body(
				r#"{"results":[{"token":"good","valid":true},{"token":"bad","valid":false}]}"#,
			);
		})
		.await;
	let client = ReqwestHubClient::from_config(&hub_config(&server))
		.expect("Client should build from a configured endpoint.");

	client
		.set_token_lease_consumed(vec!["h-1".into()])
		.await
		.expect("Consumption report should succeed.");

	let verdicts = client
		.validate_token(
			["good", "bad"]
				.into_iter()
				.map(|token| TokenInfo {
					token: LeaseToken::new(token),
					guard_name: "api".into(),
					environment: "it".into(),
				})
				.collect(),
		)
		.await
		.expect("Validation call should succeed.");

	assert_eq!(verdicts.iter().map(|verdict| verdict.valid).collect::<Vec<_>>(), [true, false]);

	consumed.assert_async().await;
	validate.assert_async().await;
}

#[tokio::test]
async fn slow_hub_fails_open_under_rpc_timeout() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/hub/v1/leases");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"leases":[{"token":"late","feature":"f1"}]}"#)
				.delay(std::time::Duration::from_secs(2));
		})
		.await;
	let config = hub_config(&server).with_rpc_timeout(Duration::milliseconds(200));
	let client = ReqwestHubClient::from_config(&config)
		.expect("Client should build from a configured endpoint.");
	let engine = Engine::new(config).with_hub(std::sync::Arc::new(client));
	let decision = engine.check_quota(&QuotaRequest::new("D1", "f1")).await;

	assert!(decision.allowed);
	assert_eq!(decision.source, DecisionSource::FailOpen);
}

#[tokio::test]
async fn connect_requires_an_endpoint() {
	let err = ReqwestHubClient::connect(&EngineConfig::new("it"), "it-client")
		.await
		.expect_err("Connecting without an endpoint must fail.");

	assert!(matches!(err, Error::Config(ConfigError::MissingHubEndpoint)));
}
