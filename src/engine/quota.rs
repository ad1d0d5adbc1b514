//! Quota decisions: serve from the guard's lease pool, fall back to the Hub, fail open.

// self
use crate::{
	_prelude::*,
	engine::Engine,
	hub::{self, LeaseSelector, QuotaServiceClient},
	lease::{LeasePool, LeaseToken, TokenLease},
};

/// Inputs for a single quota decision.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuotaRequest {
	/// Guard (decorator) name.
	pub guard: String,
	/// Feature within the guard.
	pub feature: String,
	/// Priority boost of the request.
	pub priority_boost: i32,
	/// Selector tags; a tagged request always goes to the Hub.
	pub tags: BTreeMap<String, String>,
}
impl QuotaRequest {
	/// Creates an untagged request with no priority boost.
	pub fn new(guard: impl Into<String>, feature: impl Into<String>) -> Self {
		Self { guard: guard.into(), feature: feature.into(), ..Default::default() }
	}

	/// Sets the priority boost.
	pub fn with_priority_boost(mut self, priority_boost: i32) -> Self {
		self.priority_boost = priority_boost;

		self
	}

	/// Adds a selector tag.
	pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.tags.insert(key.into(), value.into());

		self
	}
}

/// Where a [`QuotaDecision`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DecisionSource {
	/// Quota checking is disabled or no Hub is connected.
	Disabled,
	/// A cached lease served the request.
	Cache,
	/// A lease fetched for this request served it.
	Network,
	/// The Hub call failed; the request was admitted without a lease.
	FailOpen,
	/// The Hub returned no leases.
	Exhausted,
}
impl DecisionSource {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			DecisionSource::Disabled => "disabled",
			DecisionSource::Cache => "cache",
			DecisionSource::Network => "network",
			DecisionSource::FailOpen => "fail_open",
			DecisionSource::Exhausted => "exhausted",
		}
	}
}

/// Verdict of [`Engine::check_quota`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaDecision {
	/// Whether the request may proceed.
	pub allowed: bool,
	/// Lease token consumed by the request, when one was handed out.
	pub token: Option<LeaseToken>,
	/// Path that produced the verdict.
	pub source: DecisionSource,
}
impl QuotaDecision {
	fn without_lease(allowed: bool, source: DecisionSource) -> Self {
		Self { allowed, token: None, source }
	}
}

impl Engine {
	/// Decides whether `request` may proceed.
	///
	/// Untagged requests are served from the guard's pool without any I/O when a matching lease
	/// is cached. Otherwise the Hub is asked for a batch under `rpc_timeout`: an empty batch
	/// denies, an error or timeout allows without a lease. Every handed-out lease is queued for
	/// consumption reporting.
	pub async fn check_quota(&self, request: &QuotaRequest) -> QuotaDecision {
		if !self.config.check_quota_for(&request.guard) {
			return QuotaDecision::without_lease(true, DecisionSource::Disabled);
		}

		let Some(client) = self.hub.current() else {
			return QuotaDecision::without_lease(true, DecisionSource::Disabled);
		};
		let pool = self.registry.pool(&request.guard);

		if request.tags.is_empty()
			&& let Some(lease) = pool.take_matching(
				&request.feature,
				request.priority_boost,
				OffsetDateTime::now_utc(),
			) {
			return self.hand_out(lease, DecisionSource::Cache);
		}

		self.fetch_for(client.as_ref(), &pool, request).await
	}

	async fn fetch_for(
		&self,
		client: &dyn QuotaServiceClient,
		pool: &LeasePool,
		request: &QuotaRequest,
	) -> QuotaDecision {
		let selector = LeaseSelector {
			environment: self.config.environment.clone(),
			guard_name: request.guard.clone(),
			feature_name: Some(request.feature.clone()),
			tags: request.tags.clone(),
			priority_boost: request.priority_boost,
			client_id: self.client_id().to_owned(),
		};
		let call = client.get_token_lease(selector);
		let batch = match hub::with_deadline(self.config.rpc_timeout, call).await {
			Ok(batch) => batch,
			Err(e) => {
				log_event!(
					error,
					guard = %request.guard,
					feature = %request.feature,
					error = %e,
					"Lease request failed; admitting without a lease."
				);

				return QuotaDecision::without_lease(true, DecisionSource::FailOpen);
			},
		};
		let mut leases = batch
			.into_leases(OffsetDateTime::now_utc(), self.config.default_lease_duration)
			.into_iter();
		let Some(first) = leases.next() else {
			log_event!(
				debug,
				guard = %request.guard,
				feature = %request.feature,
				"Hub returned no leases; quota exhausted."
			);

			return QuotaDecision::without_lease(false, DecisionSource::Exhausted);
		};

		pool.stash(leases);

		self.hand_out(first, DecisionSource::Network)
	}

	fn hand_out(&self, lease: TokenLease, source: DecisionSource) -> QuotaDecision {
		self.consumed.push(lease.token.expose().to_owned());

		QuotaDecision { allowed: true, token: Some(lease.token), source }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::*,
		config::{EngineConfig, GuardSettings},
		hub::HubCall,
		lease::LeaseBatch,
	};

	#[tokio::test]
	async fn network_batch_serves_first_and_stashes_rest() {
		let (engine, hub) = build_memory_engine(EngineConfig::default());

		hub.push_batch(
			"search",
			LeaseBatch::new(vec![issued("t1", "f1", 0), issued("t2", "f1", 0)]),
		);

		let decision = engine.check_quota(&QuotaRequest::new("search", "f1")).await;

		assert!(decision.allowed);
		assert_eq!(decision.source, DecisionSource::Network);
		assert_eq!(decision.token, Some(LeaseToken::new("t1")));
		assert_eq!(engine.pool_snapshot("search").map(|s| s.waiting), Some(1));
		assert_eq!(engine.pending_reports(), 1);
	}

	#[tokio::test]
	async fn hub_failure_fails_open_without_lease() {
		let (engine, hub) = build_memory_engine(EngineConfig::default());

		hub.fail_next(HubCall::Lease, 1);

		let decision = engine.check_quota(&QuotaRequest::new("search", "f1")).await;

		assert_eq!(decision, QuotaDecision::without_lease(true, DecisionSource::FailOpen));
		assert_eq!(engine.pending_reports(), 0);
	}

	#[tokio::test]
	async fn empty_batch_denies() {
		let (engine, hub) = build_memory_engine(EngineConfig::default());

		hub.push_batch("search", LeaseBatch::default());

		let decision = engine.check_quota(&QuotaRequest::new("search", "f1")).await;

		assert_eq!(decision, QuotaDecision::without_lease(false, DecisionSource::Exhausted));
	}

	#[tokio::test]
	async fn disabled_guard_skips_hub() {
		let config = EngineConfig::default().with_guard(
			"search",
			GuardSettings { check_quota: Some(false), ..Default::default() },
		);
		let (engine, hub) = build_memory_engine(config);
		let decision = engine.check_quota(&QuotaRequest::new("search", "f1")).await;

		assert_eq!(decision.source, DecisionSource::Disabled);
		assert!(decision.allowed);
		assert!(hub.lease_requests().is_empty());
		assert!(engine.pool_snapshot("search").is_none());
	}

	#[tokio::test]
	async fn disconnected_engine_allows() {
		let engine = Engine::new(EngineConfig::default());
		let decision = engine.check_quota(&QuotaRequest::new("search", "f1")).await;

		assert_eq!(decision, QuotaDecision::without_lease(true, DecisionSource::Disabled));
	}

	#[tokio::test]
	async fn selector_carries_request_fields() {
		let (engine, hub) = build_memory_engine(EngineConfig::new("prod").with_client_id("c-1"));

		hub.push_batch("search", LeaseBatch::new(vec![issued("t1", "f1", 2)]));

		let request =
			QuotaRequest::new("search", "f1").with_priority_boost(2).with_tag("tier", "gold");
		let _ = engine.check_quota(&request).await;
		let selectors = hub.lease_requests();

		assert_eq!(selectors.len(), 1);
		assert_eq!(selectors[0].environment, "prod");
		assert_eq!(selectors[0].client_id, "c-1");
		assert_eq!(selectors[0].feature_name.as_deref(), Some("f1"));
		assert_eq!(selectors[0].priority_boost, 2);
		assert_eq!(selectors[0].tags.get("tier").map(String::as_str), Some("gold"));
	}
}
