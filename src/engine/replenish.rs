//! Background replenishment: per-pool maintenance on a fixed tick plus decorator-wide refills.

// crates.io
use tokio::time::MissedTickBehavior;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
// self
use crate::{
	_prelude::*,
	config,
	engine::Engine,
	hub::{self, LeaseSelector},
	obs::GuardSpan,
};

/// Summary of one maintenance pass over every pool.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
	/// Pools visited.
	pub pools: usize,
	/// Expired leases dropped across all pools.
	pub purged: usize,
	/// Waiting leases moved into the cached lists.
	pub merged: usize,
	/// Guards whose usable fraction fell below the refill threshold.
	pub refills: Vec<String>,
}

/// Result of [`Engine::refill`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefillOutcome {
	/// The Hub issued this many leases; they wait for the next merge.
	Fetched(usize),
	/// Another refill for the same pool is still running.
	InFlight,
	/// No Hub is connected.
	Disconnected,
	/// The Hub call failed or timed out.
	Failed,
}

impl Engine {
	/// Runs maintenance on every pool and reports which guards need a refill.
	///
	/// Refills are only requested while a Hub is connected.
	pub fn replenish_tick(&self, now: OffsetDateTime) -> TickReport {
		let connected = self.hub.is_connected();
		let mut report = TickReport::default();

		for (guard, pool) in self.registry.pools() {
			let maintenance = pool.maintain(now, self.config.expiring_soon_window);

			report.pools += 1;
			report.purged += maintenance.purged;
			report.merged += maintenance.merged;

			if connected && maintenance.usage.usable_fraction() < self.config.refill_threshold {
				report.refills.push(guard);
			}
		}

		report
	}

	/// Requests a decorator-wide batch for `guard` and stashes it for the next merge.
	///
	/// At most one refill per pool is in flight; concurrent calls return
	/// [`RefillOutcome::InFlight`].
	pub async fn refill(&self, guard: &str) -> RefillOutcome {
		let Some(client) = self.hub.current() else {
			return RefillOutcome::Disconnected;
		};
		let pool = self.registry.pool(guard);
		let Some(_gate) = pool.try_claim_refill() else {
			return RefillOutcome::InFlight;
		};
		let selector = LeaseSelector {
			environment: self.config.environment.clone(),
			guard_name: guard.to_owned(),
			client_id: self.client_id().to_owned(),
			..Default::default()
		};
		let call = client.get_token_lease(selector);

		match hub::with_deadline(self.config.rpc_timeout, call).await {
			Ok(batch) => {
				let leases =
					batch.into_leases(OffsetDateTime::now_utc(), self.config.default_lease_duration);
				let count = leases.len();

				pool.stash(leases);

				log_event!(debug, guard, count, "Refilled lease pool.");

				RefillOutcome::Fetched(count)
			},
			Err(e) => {
				log_event!(warn, guard, error = %e, "Lease refill failed.");

				RefillOutcome::Failed
			},
		}
	}
}

pub(crate) async fn run(engine: Engine, token: CancellationToken, tracker: TaskTracker) {
	let mut interval =
		tokio::time::interval(config::std_duration(engine.config.replenish_interval));

	interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			() = token.cancelled() => break,
			_ = interval.tick() => {},
		}

		let report = engine.replenish_tick(OffsetDateTime::now_utc());

		for guard in report.refills {
			let engine = engine.clone();
			let token = token.clone();
			let span = GuardSpan::new(&guard, "refill");

			tracker.spawn(span.instrument(async move {
				tokio::select! {
					() = token.cancelled() => {},
					_ = engine.refill(&guard) => {},
				}
			}));
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::*,
		config::EngineConfig,
		engine::{DecisionSource, QuotaRequest},
		hub::{HubCall, MemoryHub},
		lease::LeaseBatch,
	};

	#[tokio::test]
	async fn tick_merges_and_requests_refill_for_low_pools() {
		let (engine, hub) = build_memory_engine(EngineConfig::default());

		hub.set_budget("search", "f1", 100, 4);

		let _ = engine.check_quota(&QuotaRequest::new("search", "f1")).await;
		let report = engine.replenish_tick(OffsetDateTime::now_utc());

		assert_eq!(report.pools, 1);
		assert_eq!(report.merged, 3);
		assert!(report.refills.is_empty());

		for _ in 0..3 {
			let decision = engine.check_quota(&QuotaRequest::new("search", "f1")).await;

			assert_eq!(decision.source, DecisionSource::Cache);
		}

		let report = engine.replenish_tick(OffsetDateTime::now_utc());

		assert_eq!(report.refills, ["search"]);
	}

	#[tokio::test]
	async fn disconnected_tick_never_requests_refills() {
		let (engine, _hub) = build_memory_engine(EngineConfig::default());

		engine.registry.pool("search");
		engine.hub.disconnect();

		let report = engine.replenish_tick(OffsetDateTime::now_utc());

		assert_eq!(report.pools, 1);
		assert!(report.refills.is_empty());
	}

	#[tokio::test]
	async fn refill_is_decorator_wide_and_stashes() {
		let (engine, hub) = build_memory_engine(EngineConfig::default());

		hub.push_batch(
			"search",
			LeaseBatch::new(vec![issued("a", "f1", 0), issued("b", "f2", 0)]),
		);

		assert_eq!(engine.refill("search").await, RefillOutcome::Fetched(2));
		assert_eq!(hub.lease_requests()[0].feature_name, None);
		assert_eq!(engine.pool_snapshot("search").map(|s| s.waiting), Some(2));
	}

	#[tokio::test]
	async fn concurrent_refills_share_one_call() {
		let hub = Arc::new(MemoryHub::default().with_latency(Duration::milliseconds(50)));
		let engine = Engine::new(EngineConfig::default()).with_hub(hub.clone());

		hub.set_budget("search", "f1", 10, 5);

		let (first, second) = tokio::join!(engine.refill("search"), engine.refill("search"));
		let mut outcomes = [first, second];

		outcomes.sort_by_key(|outcome| matches!(outcome, RefillOutcome::InFlight));

		assert_eq!(outcomes, [RefillOutcome::Fetched(5), RefillOutcome::InFlight]);
		assert_eq!(hub.lease_requests().len(), 1);
	}

	#[tokio::test]
	async fn failed_refill_reports_failure() {
		let (engine, hub) = build_memory_engine(EngineConfig::default());

		hub.fail_next(HubCall::Lease, 1);

		assert_eq!(engine.refill("search").await, RefillOutcome::Failed);
		assert_eq!(engine.pool_snapshot("search").map(|s| s.waiting), Some(0));
	}
}
