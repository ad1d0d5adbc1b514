//! Local circuit-breaker / flow-control gate consulted before any network check.

// self
use crate::_prelude::*;

/// Whether the guarded call is being served (inbound) or issued (outbound).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficDirection {
	/// A request this process is serving.
	Inbound,
	/// A request this process is sending.
	Outbound,
}
impl TrafficDirection {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			TrafficDirection::Inbound => "inbound",
			TrafficDirection::Outbound => "outbound",
		}
	}
}
impl Display for TrafficDirection {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Admission ticket returned by [`LocalPolicy::enter`]; hand it back through
/// [`LocalPolicy::exit`] once the protected call finishes.
#[derive(Debug, PartialEq, Eq)]
pub struct PolicyEntry {
	resource: String,
	direction: TrafficDirection,
}
impl PolicyEntry {
	/// Creates an entry for `resource`.
	pub fn new(resource: impl Into<String>, direction: TrafficDirection) -> Self {
		Self { resource: resource.into(), direction }
	}

	/// Resource the entry was issued for.
	pub fn resource(&self) -> &str {
		&self.resource
	}

	/// Traffic direction the entry was issued for.
	pub fn direction(&self) -> TrafficDirection {
		self.direction
	}
}

/// Why the local policy refused a call.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Blocked by local {rule} rule: {detail}.")]
pub struct PolicyBlock {
	/// Rule family that fired (e.g. `flow`, `circuit_breaker`, `concurrency`).
	pub rule: String,
	/// Rule-specific detail.
	pub detail: String,
}
impl PolicyBlock {
	/// Creates a block for `rule` with a human-readable detail.
	pub fn new(rule: impl Into<String>, detail: impl Into<String>) -> Self {
		Self { rule: rule.into(), detail: detail.into() }
	}
}

/// Synchronous local gate. Implementations must not perform network I/O.
pub trait LocalPolicy
where
	Self: Send + Sync,
{
	/// Attempts to enter `resource`.
	fn enter(
		&self,
		resource: &str,
		direction: TrafficDirection,
	) -> Result<PolicyEntry, PolicyBlock>;

	/// Releases an entry obtained from [`LocalPolicy::enter`].
	fn exit(&self, entry: PolicyEntry);
}

/// Policy that admits everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct PermissivePolicy;
impl LocalPolicy for PermissivePolicy {
	fn enter(
		&self,
		resource: &str,
		direction: TrafficDirection,
	) -> Result<PolicyEntry, PolicyBlock> {
		Ok(PolicyEntry::new(resource, direction))
	}

	fn exit(&self, _entry: PolicyEntry) {}
}

/// Policy that caps in-flight calls per resource.
#[derive(Debug)]
pub struct ConcurrencyLimitPolicy {
	max_in_flight: usize,
	in_flight: Mutex<HashMap<String, usize>>,
}
impl ConcurrencyLimitPolicy {
	/// Allows at most `max_in_flight` concurrent entries per resource.
	pub fn new(max_in_flight: usize) -> Self {
		Self { max_in_flight, in_flight: Default::default() }
	}

	/// Current number of entries held for `resource`.
	pub fn in_flight(&self, resource: &str) -> usize {
		self.in_flight.lock().get(resource).copied().unwrap_or(0)
	}
}
impl LocalPolicy for ConcurrencyLimitPolicy {
	fn enter(
		&self,
		resource: &str,
		direction: TrafficDirection,
	) -> Result<PolicyEntry, PolicyBlock> {
		let mut in_flight = self.in_flight.lock();
		let current = in_flight.entry(resource.to_owned()).or_insert(0);

		if *current >= self.max_in_flight {
			return Err(PolicyBlock::new(
				"concurrency",
				format!("{resource} already has {} calls in flight", *current),
			));
		}

		*current += 1;

		Ok(PolicyEntry::new(resource, direction))
	}

	fn exit(&self, entry: PolicyEntry) {
		if let Some(current) = self.in_flight.lock().get_mut(entry.resource()) {
			*current = current.saturating_sub(1);
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn concurrency_limit_blocks_then_recovers_after_exit() {
		let policy = ConcurrencyLimitPolicy::new(1);
		let entry = policy
			.enter("checkout", TrafficDirection::Inbound)
			.expect("First entry should be admitted.");
		let block = policy
			.enter("checkout", TrafficDirection::Inbound)
			.expect_err("Second entry must be blocked.");

		assert_eq!(block.rule, "concurrency");
		assert!(policy.enter("search", TrafficDirection::Outbound).is_ok());

		policy.exit(entry);

		assert_eq!(policy.in_flight("checkout"), 0);
		assert!(policy.enter("checkout", TrafficDirection::Inbound).is_ok());
	}

	#[test]
	fn block_message_names_rule_and_detail() {
		let block = PolicyBlock::new("circuit_breaker", "error ratio above 50%");

		assert_eq!(
			block.to_string(),
			"Blocked by local circuit_breaker rule: error ratio above 50%."
		);
	}
}
