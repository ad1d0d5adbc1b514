// self
use crate::obs::GuardOutcome;

/// Records a guard outcome via the global metrics recorder (when enabled).
pub fn record_guard_outcome(guard: &str, outcome: GuardOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"quota_guard_requests_total",
			"guard" => guard.to_owned(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (guard, outcome);
	}
}

/// Records how long protected logic ran via the global metrics recorder (when enabled).
pub fn record_guard_duration(guard: &str, elapsed: std::time::Duration) {
	#[cfg(feature = "metrics")]
	{
		metrics::histogram!("quota_guard_duration_seconds", "guard" => guard.to_owned())
			.record(elapsed.as_secs_f64());
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (guard, elapsed);
	}
}
