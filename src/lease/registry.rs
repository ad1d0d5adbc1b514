//! Guard-name → [`LeasePool`] registry.
//!
//! The registry lock only covers pool creation and lookup; every pool carries its own
//! content locks, so traffic on one guard never contends with another.

// self
use crate::{_prelude::*, lease::LeasePool};

/// Lazily populated map of per-guard lease pools.
#[derive(Debug, Default)]
pub struct LeaseRegistry {
	pools: RwLock<HashMap<String, Arc<LeasePool>>>,
}
impl LeaseRegistry {
	/// Returns the pool for `guard`, creating it on first use.
	pub fn pool(&self, guard: &str) -> Arc<LeasePool> {
		if let Some(pool) = self.pools.read().get(guard) {
			return pool.clone();
		}

		self.pools.write().entry(guard.to_owned()).or_default().clone()
	}

	/// Returns the pool for `guard` without creating it.
	pub fn get(&self, guard: &str) -> Option<Arc<LeasePool>> {
		self.pools.read().get(guard).cloned()
	}

	/// Clones the current set of pools so callers can iterate without holding the registry lock.
	pub fn pools(&self) -> Vec<(String, Arc<LeasePool>)> {
		self.pools.read().iter().map(|(guard, pool)| (guard.clone(), pool.clone())).collect()
	}

	/// Number of guards seen so far.
	pub fn len(&self) -> usize {
		self.pools.read().len()
	}

	/// Returns `true` before the first pool is created.
	pub fn is_empty(&self) -> bool {
		self.pools.read().is_empty()
	}
}
