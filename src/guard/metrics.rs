// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::obs::GuardOutcome;

/// Thread-safe counters for guard outcomes.
#[derive(Debug, Default)]
pub struct GuardMetrics {
	allowed: AtomicU64,
	blocked: AtomicU64,
	succeeded: AtomicU64,
	failed: AtomicU64,
	unknown: AtomicU64,
}
impl GuardMetrics {
	/// Returns the number of admitted requests.
	pub fn allowed(&self) -> u64 {
		self.allowed.load(Ordering::Relaxed)
	}

	/// Returns the number of refused requests.
	pub fn blocked(&self) -> u64 {
		self.blocked.load(Ordering::Relaxed)
	}

	/// Returns the number of admissions that ended in success.
	pub fn succeeded(&self) -> u64 {
		self.succeeded.load(Ordering::Relaxed)
	}

	/// Returns the number of admissions that ended in failure.
	pub fn failed(&self) -> u64 {
		self.failed.load(Ordering::Relaxed)
	}

	/// Returns the number of admissions that ended without a verdict.
	pub fn unknown(&self) -> u64 {
		self.unknown.load(Ordering::Relaxed)
	}

	pub(crate) fn record(&self, outcome: GuardOutcome) {
		let counter = match outcome {
			GuardOutcome::Allowed => &self.allowed,
			GuardOutcome::Blocked => &self.blocked,
			GuardOutcome::Succeeded => &self.succeeded,
			GuardOutcome::Failed => &self.failed,
			GuardOutcome::Unknown => &self.unknown,
		};

		counter.fetch_add(1, Ordering::Relaxed);
	}
}
