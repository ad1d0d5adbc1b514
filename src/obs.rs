//! Optional observability helpers for guard evaluations and pool refills.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `quota_guard.guard` with the `guard` and
//!   `stage` fields, plus error events for every Hub call that fails open.
//! - Enable `metrics` to increment the `quota_guard_requests_total` counter (labeled by `guard`
//!   + `outcome`) and record `quota_guard_duration_seconds` (labeled by `guard`).
//!
//! Both are further gated at runtime by [`Capabilities::telemetry`](crate::config::Capabilities).

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Outcome labels recorded for each guarded request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GuardOutcome {
	/// Every stage admitted the request.
	Allowed,
	/// A stage refused the request.
	Blocked,
	/// Protected logic reported success.
	Succeeded,
	/// Protected logic reported failure.
	Failed,
	/// Protected logic finished without a verdict.
	Unknown,
}
impl GuardOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			GuardOutcome::Allowed => "allowed",
			GuardOutcome::Blocked => "blocked",
			GuardOutcome::Succeeded => "succeeded",
			GuardOutcome::Failed => "failed",
			GuardOutcome::Unknown => "unknown",
		}
	}
}
impl Display for GuardOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
