//! Lease domain: Hub-issued single-use tokens, per-guard pools, and the guard registry.

pub mod pool;
pub mod registry;
pub mod token;

pub use pool::*;
pub use registry::*;
pub use token::*;

// crates.io
use time::PrimitiveDateTime;
// self
use crate::_prelude::*;

/// Latest representable expiry; leases stamped with it never expire in practice.
pub const NEVER_EXPIRES: OffsetDateTime = PrimitiveDateTime::MAX.assume_utc();

/// Returns `now + duration`, saturating at [`NEVER_EXPIRES`] (or at `now` when it underflows).
pub fn expiry_after(now: OffsetDateTime, duration: Duration) -> OffsetDateTime {
	now.checked_add(duration)
		.unwrap_or(if duration.is_negative() { now } else { NEVER_EXPIRES })
}

/// A time-bound, single-use authorization held in a [`LeasePool`].
///
/// Leases are immutable once issued. Consuming one moves it out of its pool for good.
#[derive(Clone, Debug, PartialEq)]
pub struct TokenLease {
	/// Opaque token forwarded downstream and reported back to the Hub once consumed.
	pub token: LeaseToken,
	/// Feature the lease was issued for.
	pub feature: String,
	/// Highest priority boost the lease was issued at; requests at or above it may use it.
	pub priority_boost: i32,
	/// Hub-assigned weight, carried for downstream accounting.
	pub weight: f32,
	/// Instant after which the lease is unusable.
	pub expires_at: OffsetDateTime,
}
impl TokenLease {
	/// Returns `true` once `now` has reached the expiry instant.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		now >= self.expires_at
	}

	/// Returns `true` if the lease may serve a request for `feature` at `priority_boost`.
	pub fn serves(&self, feature: &str, priority_boost: i32, now: OffsetDateTime) -> bool {
		self.feature == feature && self.priority_boost <= priority_boost && !self.is_expired_at(now)
	}
}

/// Lease as transmitted by the Hub; the expiry may be omitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IssuedLease {
	/// Opaque lease token.
	pub token: LeaseToken,
	/// Feature the lease was issued for.
	#[serde(default)]
	pub feature: String,
	/// Priority boost the lease was issued at.
	#[serde(default)]
	pub priority_boost: i32,
	/// Hub-assigned weight.
	#[serde(default)]
	pub weight: f32,
	/// Explicit expiry, if the Hub supplied one.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub expires_at: Option<OffsetDateTime>,
}
impl IssuedLease {
	/// Converts into a [`TokenLease`], stamping `now + duration` when no expiry was supplied.
	pub fn into_lease(self, now: OffsetDateTime, duration: Duration) -> TokenLease {
		TokenLease {
			token: self.token,
			feature: self.feature,
			priority_boost: self.priority_boost,
			weight: self.weight,
			expires_at: self.expires_at.unwrap_or_else(|| expiry_after(now, duration)),
		}
	}
}

/// Batch of leases returned by a single Hub call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LeaseBatch {
	/// Issued leases in Hub order.
	pub leases: Vec<IssuedLease>,
	/// Lifetime to stamp on leases that carry no explicit expiry.
	pub duration: Option<Duration>,
}
impl LeaseBatch {
	/// Creates a batch without a lifetime hint.
	pub fn new(leases: Vec<IssuedLease>) -> Self {
		Self { leases, duration: None }
	}

	/// Sets the lifetime hint.
	pub fn with_duration(mut self, duration: Duration) -> Self {
		self.duration = Some(duration);

		self
	}

	/// Returns `true` if the Hub issued nothing.
	pub fn is_empty(&self) -> bool {
		self.leases.is_empty()
	}

	/// Stamps expiries and yields pool-ready leases, preserving Hub order.
	pub fn into_leases(self, now: OffsetDateTime, fallback: Duration) -> Vec<TokenLease> {
		let duration = self.duration.unwrap_or(fallback);

		self.leases.into_iter().map(|lease| lease.into_lease(now, duration)).collect()
	}
}
