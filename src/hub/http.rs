//! JSON-over-HTTP [`QuotaServiceClient`] backed by reqwest.
//!
//! Endpoints are resolved relative to the configured Hub base URL:
//!
//! - `POST v1/handshake` announces the client before first use.
//! - `POST v1/leases` issues a [`LeaseBatch`].
//! - `POST v1/leases/consumed` accepts consumption reports.
//! - `POST v1/tokens/validate` returns one verdict per submitted token.
//!
//! Non-2xx responses surface as [`HubError::Status`]; malformed bodies surface as
//! [`HubError::Decode`] with the failing JSON path.

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	config::EngineConfig,
	error::{ConfigError, HubError},
	hub::{self, HubFuture, LeaseSelector, QuotaServiceClient, TokenInfo, TokenValidity},
	lease::{IssuedLease, LeaseBatch},
};

#[derive(Deserialize)]
struct LeaseResponse {
	#[serde(default)]
	leases: Vec<IssuedLease>,
	#[serde(default)]
	duration_secs: Option<i64>,
}

#[derive(Serialize)]
struct ConsumedRequest<'a> {
	tokens: &'a [String],
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
	tokens: &'a [TokenInfo],
}

#[derive(Deserialize)]
struct ValidateResponse {
	#[serde(default)]
	results: Vec<TokenValidity>,
}

#[derive(Serialize)]
struct HandshakeRequest<'a> {
	environment: &'a str,
	client_id: &'a str,
}

/// Hub client speaking JSON over HTTP.
#[derive(Clone, Debug)]
pub struct ReqwestHubClient {
	client: ReqwestClient,
	endpoint: Url,
}
impl ReqwestHubClient {
	/// Creates a client for `endpoint` using a default reqwest client.
	pub fn new(endpoint: Url) -> Self {
		Self::with_client(ReqwestClient::default(), endpoint)
	}

	/// Wraps an existing reqwest client.
	pub fn with_client(client: ReqwestClient, mut endpoint: Url) -> Self {
		if !endpoint.path().ends_with('/') {
			let path = format!("{}/", endpoint.path());

			endpoint.set_path(&path);
		}

		Self { client, endpoint }
	}

	/// Builds a client from `config`, requiring [`EngineConfig::hub_endpoint`].
	pub fn from_config(config: &EngineConfig) -> Result<Self> {
		let endpoint = config.hub_endpoint.clone().ok_or(ConfigError::MissingHubEndpoint)?;
		let client = ReqwestClient::builder().build().map_err(ConfigError::from)?;

		Ok(Self::with_client(client, endpoint))
	}

	/// Builds a client from `config` and performs the handshake under
	/// [`EngineConfig::handshake_timeout`].
	pub async fn connect(config: &EngineConfig, client_id: &str) -> Result<Self> {
		let hub = Self::from_config(config)?;
		let request = HandshakeRequest { environment: &config.environment, client_id };
		let call: HubFuture<'_, ()> = Box::pin(hub.post_unit("v1/handshake", &request));

		hub::with_deadline(config.handshake_timeout, call).await?;

		log_event!(info, environment = %config.environment, client_id, "connected to hub");

		Ok(hub)
	}

	/// Base URL requests are resolved against.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	async fn send<B>(&self, path: &str, body: &B) -> Result<Vec<u8>, HubError>
	where
		B: Serialize + Sync,
	{
		let url = self.endpoint.join(path).map_err(HubError::transport)?;
		let response = self.client.post(url).json(body).send().await?;
		let status = response.status();
		let bytes = response.bytes().await?;

		if !status.is_success() {
			return Err(HubError::Status {
				status: status.as_u16(),
				message: String::from_utf8_lossy(&bytes).trim().to_owned(),
			});
		}

		Ok(bytes.to_vec())
	}

	async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, HubError>
	where
		B: Serialize + Sync,
		T: DeserializeOwned,
	{
		let bytes = self.send(path, body).await?;
		let mut de = serde_json::Deserializer::from_slice(&bytes);

		serde_path_to_error::deserialize(&mut de).map_err(HubError::decode)
	}

	async fn post_unit<B>(&self, path: &str, body: &B) -> Result<(), HubError>
	where
		B: Serialize + Sync,
	{
		self.send(path, body).await.map(|_| ())
	}
}
impl QuotaServiceClient for ReqwestHubClient {
	fn get_token_lease(&self, selector: LeaseSelector) -> HubFuture<'_, LeaseBatch> {
		Box::pin(async move {
			let response: LeaseResponse = self.post_json("v1/leases", &selector).await?;

			Ok(LeaseBatch {
				leases: response.leases,
				duration: response.duration_secs.filter(|secs| *secs > 0).map(Duration::seconds),
			})
		})
	}

	fn set_token_lease_consumed(&self, tokens: Vec<String>) -> HubFuture<'_, ()> {
		Box::pin(async move {
			self.post_unit("v1/leases/consumed", &ConsumedRequest { tokens: &tokens }).await
		})
	}

	fn validate_token(&self, tokens: Vec<TokenInfo>) -> HubFuture<'_, Vec<TokenValidity>> {
		Box::pin(async move {
			let response: ValidateResponse =
				self.post_json("v1/tokens/validate", &ValidateRequest { tokens: &tokens }).await?;

			Ok(response.results)
		})
	}
}
