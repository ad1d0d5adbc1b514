//! The admission pipeline: local policy, then quota, then ingress token validation.
//!
//! [`Engine::guard`] runs the stages in order and stops at the first refusal. An admitted call
//! receives an [`Admission`], which releases the local policy entry and records the outcome of
//! the protected logic when it is ended (or dropped).

mod metrics;

pub use metrics::GuardMetrics;

// self
use crate::{
	_prelude::*,
	engine::{Engine, QuotaRequest},
	ext::{LocalPolicy, PolicyEntry, TrafficDirection},
	lease::LeaseToken,
	obs::{self, GuardOutcome, GuardSpan},
};

/// A guarded call about to run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardRequest {
	/// Guard (decorator) name; also the local policy resource.
	pub guard: String,
	/// Feature within the guard.
	pub feature: String,
	/// Priority boost of the request.
	pub priority_boost: i32,
	/// Selector tags forwarded to the quota check.
	pub tags: BTreeMap<String, String>,
	/// Whether the call is being served or issued.
	pub direction: TrafficDirection,
	/// Tokens presented by an inbound caller.
	pub ingress_tokens: Vec<LeaseToken>,
}
impl GuardRequest {
	/// Creates a request with no tags, boost, or tokens.
	pub fn new(
		guard: impl Into<String>,
		feature: impl Into<String>,
		direction: TrafficDirection,
	) -> Self {
		Self {
			guard: guard.into(),
			feature: feature.into(),
			priority_boost: 0,
			tags: BTreeMap::new(),
			direction,
			ingress_tokens: Vec::new(),
		}
	}

	/// Shorthand for an inbound request.
	pub fn inbound(guard: impl Into<String>, feature: impl Into<String>) -> Self {
		Self::new(guard, feature, TrafficDirection::Inbound)
	}

	/// Shorthand for an outbound request.
	pub fn outbound(guard: impl Into<String>, feature: impl Into<String>) -> Self {
		Self::new(guard, feature, TrafficDirection::Outbound)
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

	/// Adds an ingress token presented by the caller.
	pub fn with_ingress_token(mut self, token: impl Into<String>) -> Self {
		self.ingress_tokens.push(LeaseToken::new(token));

		self
	}

	fn quota_request(&self) -> QuotaRequest {
		QuotaRequest {
			guard: self.guard.clone(),
			feature: self.feature.clone(),
			priority_boost: self.priority_boost,
			tags: self.tags.clone(),
		}
	}
}

/// Stage that refused a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockReason {
	/// The local policy refused entry.
	LocalPolicy,
	/// The Hub reported no remaining quota.
	QuotaExhausted,
	/// Required ingress tokens were missing or rejected.
	InvalidToken,
}
impl BlockReason {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			BlockReason::LocalPolicy => "local_policy",
			BlockReason::QuotaExhausted => "quota_exhausted",
			BlockReason::InvalidToken => "invalid_token",
		}
	}
}
impl Display for BlockReason {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Refusal returned instead of running the protected logic.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Guard {guard} blocked the call ({reason}): {message}")]
pub struct Blocked {
	/// Guard that refused the call.
	pub guard: String,
	/// Stage that refused the call.
	pub reason: BlockReason,
	/// Human-readable detail.
	pub message: String,
}

/// How the protected logic finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallOutcome {
	/// The protected logic succeeded.
	Success,
	/// The protected logic failed.
	Failure,
	/// The protected logic finished without reporting a verdict.
	Unknown,
}
impl From<CallOutcome> for GuardOutcome {
	fn from(outcome: CallOutcome) -> Self {
		match outcome {
			CallOutcome::Success => GuardOutcome::Succeeded,
			CallOutcome::Failure => GuardOutcome::Failed,
			CallOutcome::Unknown => GuardOutcome::Unknown,
		}
	}
}

/// Result of [`Engine::guard`].
#[must_use]
#[derive(Debug)]
pub enum GuardVerdict {
	/// Every stage admitted the call.
	Allowed(Admission),
	/// A stage refused the call.
	Blocked(Blocked),
}
impl GuardVerdict {
	/// Returns `true` for [`GuardVerdict::Allowed`].
	pub fn is_allowed(&self) -> bool {
		matches!(self, GuardVerdict::Allowed(_))
	}

	/// Converts the verdict into a `Result` so callers can use `?`.
	pub fn into_result(self) -> Result<Admission, Blocked> {
		match self {
			GuardVerdict::Allowed(admission) => Ok(admission),
			GuardVerdict::Blocked(blocked) => Err(blocked),
		}
	}
}

/// Permission to run the protected logic.
///
/// Call [`Admission::end`] with the outcome once the logic returns. Dropping an admission
/// without ending it records [`CallOutcome::Unknown`]. Either way the local policy entry is
/// released exactly once.
#[must_use]
pub struct Admission {
	guard: String,
	token: Option<LeaseToken>,
	started_at: Option<Instant>,
	permit: PolicyPermit,
	metrics: Arc<GuardMetrics>,
}
impl Admission {
	/// Guard that admitted the call.
	pub fn guard(&self) -> &str {
		&self.guard
	}

	/// Lease token consumed by the call, if the quota stage handed one out.
	pub fn token(&self) -> Option<&LeaseToken> {
		self.token.as_ref()
	}

	/// Records `outcome` and releases the local policy entry.
	pub fn end(mut self, outcome: CallOutcome) {
		self.finish(outcome);
	}

	fn finish(&mut self, outcome: CallOutcome) {
		if !self.permit.is_held() {
			return;
		}

		let outcome = GuardOutcome::from(outcome);

		self.metrics.record(outcome);

		// Telemetry disabled at admission time leaves no start time.
		if let Some(started_at) = self.started_at {
			obs::record_guard_outcome(&self.guard, outcome);
			obs::record_guard_duration(&self.guard, started_at.elapsed());
		}

		self.permit.release();
	}
}
impl Drop for Admission {
	fn drop(&mut self) {
		self.finish(CallOutcome::Unknown);
	}
}
impl Debug for Admission {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Admission")
			.field("guard", &self.guard)
			.field("token", &self.token)
			.field("ended", &!self.permit.is_held())
			.finish()
	}
}

/// Local policy entry that goes back to its policy exactly once.
///
/// Held from the moment [`LocalPolicy::enter`] succeeds, so an evaluation cancelled mid-await
/// still releases its slot when the future is dropped.
struct PolicyPermit {
	policy: Arc<dyn LocalPolicy>,
	entry: Option<PolicyEntry>,
}
impl PolicyPermit {
	fn is_held(&self) -> bool {
		self.entry.is_some()
	}

	fn release(&mut self) {
		if let Some(entry) = self.entry.take() {
			self.policy.exit(entry);
		}
	}
}
impl Drop for PolicyPermit {
	fn drop(&mut self) {
		self.release();
	}
}

impl Engine {
	/// Runs the admission pipeline for `request`.
	pub async fn guard(&self, request: GuardRequest) -> GuardVerdict {
		let span = GuardSpan::new(&request.guard, "guard");

		span.instrument(self.evaluate(request)).await
	}

	async fn evaluate(&self, request: GuardRequest) -> GuardVerdict {
		let telemetry = self.config.capabilities.telemetry;
		let started_at = telemetry.then(Instant::now);
		let mut permit = match self.policy.enter(&request.guard, request.direction) {
			Ok(entry) => PolicyPermit { policy: self.policy.clone(), entry: Some(entry) },
			Err(block) =>
				return self.block(&request.guard, BlockReason::LocalPolicy, block.to_string()),
		};
		let decision = self.check_quota(&request.quota_request()).await;

		if !decision.allowed {
			permit.release();

			return self.block(
				&request.guard,
				BlockReason::QuotaExhausted,
				format!("no quota left for feature {}", request.feature),
			);
		}
		if request.direction == TrafficDirection::Inbound {
			let required = self.config.validate_ingress_tokens_for(&request.guard);

			if !self.validate_tokens(&request.guard, &request.ingress_tokens, required).await {
				permit.release();

				return self.block(
					&request.guard,
					BlockReason::InvalidToken,
					"ingress tokens missing or rejected".into(),
				);
			}
		}

		self.metrics.record(GuardOutcome::Allowed);

		if telemetry {
			obs::record_guard_outcome(&request.guard, GuardOutcome::Allowed);
		}

		GuardVerdict::Allowed(Admission {
			guard: request.guard,
			token: decision.token,
			started_at,
			permit,
			metrics: self.metrics.clone(),
		})
	}

	fn block(&self, guard: &str, reason: BlockReason, message: String) -> GuardVerdict {
		log_event!(debug, guard, reason = %reason, message = %message, "Guard blocked the call.");

		self.metrics.record(GuardOutcome::Blocked);

		if self.config.capabilities.telemetry {
			obs::record_guard_outcome(guard, GuardOutcome::Blocked);
		}

		GuardVerdict::Blocked(Blocked { guard: guard.to_owned(), reason, message })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::*,
		config::{Capabilities, EngineConfig},
		ext::ConcurrencyLimitPolicy,
		hub::{HubCall, MemoryHub},
		lease::LeaseBatch,
	};

	#[tokio::test]
	async fn admission_releases_policy_entry_once() {
		let policy = Arc::new(ConcurrencyLimitPolicy::new(1));
		let (engine, _hub) = build_memory_engine(EngineConfig::default());
		let engine = engine.with_policy(policy.clone());
		let admission = engine
			.guard(GuardRequest::outbound("search", "f1"))
			.await
			.into_result()
			.expect("First call should be admitted.");

		assert_eq!(policy.in_flight("search"), 1);

		let blocked = engine
			.guard(GuardRequest::outbound("search", "f1"))
			.await
			.into_result()
			.expect_err("Second concurrent call must be blocked.");

		assert_eq!(blocked.reason, BlockReason::LocalPolicy);

		admission.end(CallOutcome::Success);

		assert_eq!(policy.in_flight("search"), 0);
		assert_eq!(engine.metrics.allowed(), 1);
		assert_eq!(engine.metrics.blocked(), 1);
		assert_eq!(engine.metrics.succeeded(), 1);
	}

	#[tokio::test]
	async fn dropped_admission_records_unknown() {
		let (engine, _hub) = build_memory_engine(EngineConfig::default());

		{
			let verdict = engine.guard(GuardRequest::outbound("search", "f1")).await;

			assert!(verdict.is_allowed());
		}

		assert_eq!(engine.metrics.unknown(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn cancelled_evaluation_releases_policy_entry() {
		let policy = Arc::new(ConcurrencyLimitPolicy::new(1));
		let hub = Arc::new(MemoryHub::default().with_latency(Duration::milliseconds(500)));
		let engine = Engine::new(EngineConfig::default())
			.with_hub(hub.clone())
			.with_policy(policy.clone());

		hub.set_budget("search", "f1", 10, 2);

		let timed_out = tokio::time::timeout(
			std::time::Duration::from_millis(100),
			engine.guard(GuardRequest::outbound("search", "f1")),
		)
		.await
		.is_err();

		assert!(timed_out, "The slow Hub call should outlive the caller's timeout.");
		assert_eq!(policy.in_flight("search"), 0);
		assert!(engine.guard(GuardRequest::outbound("search", "f1")).await.is_allowed());
		assert_eq!(engine.metrics.unknown(), 1);
	}

	#[tokio::test]
	async fn quota_exhaustion_releases_entry_and_blocks() {
		let policy = Arc::new(ConcurrencyLimitPolicy::new(1));
		let (engine, hub) = build_memory_engine(EngineConfig::default());
		let engine = engine.with_policy(policy.clone());

		hub.push_batch("search", LeaseBatch::default());

		let blocked = engine
			.guard(GuardRequest::outbound("search", "f1"))
			.await
			.into_result()
			.expect_err("Exhausted quota must block.");

		assert_eq!(blocked.reason, BlockReason::QuotaExhausted);
		assert_eq!(policy.in_flight("search"), 0);
	}

	#[tokio::test]
	async fn inbound_tokens_are_checked_only_when_required() {
		let config = EngineConfig::default().with_capabilities(Capabilities {
			validate_ingress_tokens: true,
			..Default::default()
		});
		let (engine, hub) = build_memory_engine(config);

		hub.set_budget("api", "f1", 10, 2);
		hub.set_token_validity("caller", true);

		let blocked = engine
			.guard(GuardRequest::inbound("api", "f1"))
			.await
			.into_result()
			.expect_err("Missing tokens must block.");

		assert_eq!(blocked.reason, BlockReason::InvalidToken);

		let admission = engine
			.guard(GuardRequest::inbound("api", "f1").with_ingress_token("caller"))
			.await
			.into_result()
			.expect("Valid tokens should be admitted.");

		assert!(admission.token().is_some());

		admission.end(CallOutcome::Failure);

		assert_eq!(engine.metrics.failed(), 1);

		let outbound = engine.guard(GuardRequest::outbound("api", "f1")).await;

		assert!(outbound.is_allowed());
		assert_eq!(hub.validation_requests().len(), 1);
	}

	#[tokio::test]
	async fn hub_outage_admits_through_every_stage() {
		let config = EngineConfig::default().with_capabilities(Capabilities {
			validate_ingress_tokens: true,
			..Default::default()
		});
		let (engine, hub) = build_memory_engine(config);

		hub.fail_next(HubCall::Lease, 1);
		hub.fail_next(HubCall::Validate, 1);

		let admission = engine
			.guard(GuardRequest::inbound("api", "f1").with_ingress_token("whatever"))
			.await
			.into_result()
			.expect("Hub failures must fail open.");

		assert!(admission.token().is_none());
	}
}
