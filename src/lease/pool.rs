//! Per-guard lease pool.
//!
//! A pool keeps two lists. `cached` holds leases ready for synchronous pickup and shares a
//! lock with the `used` counter; `waiting` holds leases fetched off the hot path and has its
//! own lock, so request threads picking from `cached` never wait on a refill that is
//! appending to `waiting`. The replenisher moves `waiting` into `cached` on each tick.

// self
use crate::{
	_prelude::*,
	lease::{self, TokenLease},
};

/// Point-in-time utilization of a pool's cached leases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolUsage {
	/// Leases currently cached.
	pub cached: usize,
	/// Cached leases expiring within the configured window.
	pub expiring_soon: usize,
	/// Leases consumed or expired since the last batch was merged.
	pub used: u64,
}
impl PoolUsage {
	/// Fraction of issued capacity that is still usable: `(cached - expiring_soon) / (cached +
	/// used)`. An empty, unused pool reports `0.0`.
	pub fn usable_fraction(&self) -> f64 {
		let total = self.cached as f64 + self.used as f64;

		if total <= 0.0 {
			return 0.0;
		}

		self.cached.saturating_sub(self.expiring_soon) as f64 / total
	}
}

/// Outcome of one maintenance pass over a pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolMaintenance {
	/// Expired leases dropped from `cached`.
	pub purged: usize,
	/// Waiting leases merged into `cached`.
	pub merged: usize,
	/// Utilization after purge and merge.
	pub usage: PoolUsage,
}

/// Counts captured by [`LeasePool::snapshot`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
	/// Leases ready for pickup.
	pub cached: usize,
	/// Leases awaiting merge.
	pub waiting: usize,
	/// Usage counter.
	pub used: u64,
}

#[derive(Debug, Default)]
struct PoolState {
	cached: VecDeque<TokenLease>,
	used: u64,
}

/// Unconsumed leases and usage counters for one guard.
#[derive(Debug, Default)]
pub struct LeasePool {
	state: Mutex<PoolState>,
	waiting: Mutex<Vec<TokenLease>>,
	refill_gate: Arc<AsyncMutex<()>>,
}
impl LeasePool {
	/// Removes and returns the first cached lease, in insertion order, that serves the request.
	pub fn take_matching(
		&self,
		feature: &str,
		priority_boost: i32,
		now: OffsetDateTime,
	) -> Option<TokenLease> {
		let mut state = self.state.lock();
		let index =
			state.cached.iter().position(|lease| lease.serves(feature, priority_boost, now))?;
		let lease = state.cached.remove(index)?;

		state.used += 1;

		Some(lease)
	}

	/// Appends leases to the waiting list for the next merge.
	pub fn stash<I>(&self, leases: I)
	where
		I: IntoIterator<Item = TokenLease>,
	{
		self.waiting.lock().extend(leases);
	}

	/// Purges expired leases, merges waiting leases, and measures utilization.
	///
	/// Expiring-soon leases are counted after the merge, so a short-lived fresh batch is not
	/// mistaken for usable capacity. Each purged lease counts as used. A non-empty merge resets `used` to zero because a
	/// fresh batch starts a new utilization baseline.
	pub fn maintain(&self, now: OffsetDateTime, expiring_soon_window: Duration) -> PoolMaintenance {
		let incoming = std::mem::take(&mut *self.waiting.lock());
		let mut state = self.state.lock();
		let before = state.cached.len();

		state.cached.retain(|lease| !lease.is_expired_at(now));

		let purged = before - state.cached.len();

		state.used += purged as u64;

		let merged = incoming.len();

		if merged > 0 {
			state.cached.extend(incoming);
			state.used = 0;
		}

		let horizon = lease::expiry_after(now, expiring_soon_window);
		let expiring_soon =
			state.cached.iter().filter(|lease| lease.expires_at <= horizon).count();
		let usage = PoolUsage { cached: state.cached.len(), expiring_soon, used: state.used };

		PoolMaintenance { purged, merged, usage }
	}

	/// Returns current list sizes and the usage counter.
	pub fn snapshot(&self) -> PoolSnapshot {
		let waiting = self.waiting.lock().len();
		let state = self.state.lock();

		PoolSnapshot { cached: state.cached.len(), waiting, used: state.used }
	}

	/// Claims the refill gate if no other refill is in flight for this pool.
	pub(crate) fn try_claim_refill(&self) -> Option<async_lock::MutexGuardArc<()>> {
		self.refill_gate.try_lock_arc()
	}
}
