//! Engine configuration: deadlines, tick intervals, refill policy, and capability flags.
//!
//! Values can be assembled in code with the `with_*` setters or parsed from JSON via
//! [`EngineConfig::from_json_str`]. Durations are expressed in milliseconds on the wire
//! (`*_ms` keys). Per-guard [`GuardSettings`] override the engine-wide [`Capabilities`].

// self
use crate::{_prelude::*, error::ConfigError};

const DEFAULT_ENVIRONMENT: &str = "default";

/// Environment-level capability flags; a disabled capability degrades that stage to "allow".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
	/// Consult the lease cache / Hub before admitting requests.
	pub check_quota: bool,
	/// Validate tokens presented by inbound callers.
	pub validate_ingress_tokens: bool,
	/// Emit outcome counters and duration histograms through the `metrics` facade.
	pub telemetry: bool,
}
impl Default for Capabilities {
	fn default() -> Self {
		Self { check_quota: true, validate_ingress_tokens: false, telemetry: true }
	}
}

/// Per-guard overrides applied on top of [`Capabilities`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
	/// Overrides [`Capabilities::check_quota`] for this guard.
	pub check_quota: Option<bool>,
	/// Overrides [`Capabilities::validate_ingress_tokens`] for this guard.
	pub validate_ingress_tokens: Option<bool>,
}

/// Tunables for the admission engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
	/// Deployment environment reported to the Hub with every selector.
	pub environment: String,
	/// Stable client identifier; generated at engine construction when absent.
	pub client_id: Option<String>,
	/// Base URL of the Hub's HTTP surface.
	pub hub_endpoint: Option<Url>,
	/// Engine-wide capability flags.
	pub capabilities: Capabilities,
	/// Deadline applied to lease, consumption, and validation calls.
	#[serde(rename = "rpc_timeout_ms", with = "millis")]
	pub rpc_timeout: Duration,
	/// Deadline applied to the initial control-plane handshake.
	#[serde(rename = "handshake_timeout_ms", with = "millis")]
	pub handshake_timeout: Duration,
	/// Tick of the replenishment loop.
	#[serde(rename = "replenish_interval_ms", with = "millis")]
	pub replenish_interval: Duration,
	/// Tick of the consumption batcher.
	#[serde(rename = "flush_interval_ms", with = "millis")]
	pub flush_interval: Duration,
	/// Leases expiring within this window do not count as usable capacity.
	#[serde(rename = "expiring_soon_window_ms", with = "millis")]
	pub expiring_soon_window: Duration,
	/// Lifetime stamped on leases the Hub issued without an expiry or batch duration.
	#[serde(rename = "default_lease_duration_ms", with = "millis")]
	pub default_lease_duration: Duration,
	/// Usable fraction below which the replenisher requests a new batch.
	pub refill_threshold: f64,
	/// Per-guard overrides keyed by guard name.
	pub guards: HashMap<String, GuardSettings>,
}
impl EngineConfig {
	const DEFAULT_EXPIRING_SOON_WINDOW: Duration = Duration::seconds(2);
	const DEFAULT_FLUSH_INTERVAL: Duration = Duration::milliseconds(200);
	const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::seconds(10);
	const DEFAULT_LEASE_DURATION: Duration = Duration::seconds(10);
	const DEFAULT_REFILL_THRESHOLD: f64 = 0.2;
	const DEFAULT_REPLENISH_INTERVAL: Duration = Duration::milliseconds(200);
	const DEFAULT_RPC_TIMEOUT: Duration = Duration::seconds(1);

	/// Creates a configuration with default tunables for the provided environment.
	pub fn new(environment: impl Into<String>) -> Self {
		Self { environment: environment.into(), ..Default::default() }
	}

	/// Parses and validates a JSON document, reporting the path of the first bad field.
	pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(raw);
		let config: Self = serde_path_to_error::deserialize(&mut de).map_err(|err| {
			let path = err.path().to_string();

			ConfigError::Parse { path, source: err.into_inner() }
		})?;

		config.validate()?;

		Ok(config)
	}

	/// Sets a fixed client identifier.
	pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_id = Some(client_id.into());

		self
	}

	/// Sets the Hub base URL.
	pub fn with_hub_endpoint(mut self, endpoint: Url) -> Self {
		self.hub_endpoint = Some(endpoint);

		self
	}

	/// Replaces the engine-wide capability flags.
	pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
		self.capabilities = capabilities;

		self
	}

	/// Overrides the RPC deadline (defaults to 1 second).
	pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
		self.rpc_timeout = timeout;

		self
	}

	/// Overrides the handshake deadline (defaults to 10 seconds).
	pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
		self.handshake_timeout = timeout;

		self
	}

	/// Overrides the replenishment tick (defaults to 200 milliseconds).
	pub fn with_replenish_interval(mut self, interval: Duration) -> Self {
		self.replenish_interval = interval;

		self
	}

	/// Overrides the consumption flush tick (defaults to 200 milliseconds).
	pub fn with_flush_interval(mut self, interval: Duration) -> Self {
		self.flush_interval = interval;

		self
	}

	/// Overrides the expiring-soon window (defaults to 2 seconds).
	pub fn with_expiring_soon_window(mut self, window: Duration) -> Self {
		self.expiring_soon_window = if window.is_negative() { Duration::ZERO } else { window };

		self
	}

	/// Overrides the fallback lease lifetime (defaults to 10 seconds).
	pub fn with_default_lease_duration(mut self, duration: Duration) -> Self {
		self.default_lease_duration = duration;

		self
	}

	/// Overrides the refill threshold (defaults to 0.2).
	pub fn with_refill_threshold(mut self, threshold: f64) -> Self {
		self.refill_threshold = threshold;

		self
	}

	/// Registers per-guard overrides.
	pub fn with_guard(mut self, guard: impl Into<String>, settings: GuardSettings) -> Self {
		self.guards.insert(guard.into(), settings);

		self
	}

	/// Whether quota checks are enabled for `guard`.
	pub fn check_quota_for(&self, guard: &str) -> bool {
		self.guards
			.get(guard)
			.and_then(|settings| settings.check_quota)
			.unwrap_or(self.capabilities.check_quota)
	}

	/// Whether ingress token validation is required for `guard`.
	pub fn validate_ingress_tokens_for(&self, guard: &str) -> bool {
		self.guards
			.get(guard)
			.and_then(|settings| settings.validate_ingress_tokens)
			.unwrap_or(self.capabilities.validate_ingress_tokens)
	}

	/// Validates invariants for the configuration.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.environment.trim().is_empty() {
			return Err(ConfigError::EmptyEnvironment);
		}
		if !(0.0..=1.0).contains(&self.refill_threshold) {
			return Err(ConfigError::RefillThresholdOutOfRange { value: self.refill_threshold });
		}

		ensure_positive("rpc_timeout", self.rpc_timeout)?;
		ensure_positive("handshake_timeout", self.handshake_timeout)?;
		ensure_positive("replenish_interval", self.replenish_interval)?;
		ensure_positive("flush_interval", self.flush_interval)?;
		ensure_positive("default_lease_duration", self.default_lease_duration)?;

		Ok(())
	}
}
impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			environment: DEFAULT_ENVIRONMENT.into(),
			client_id: None,
			hub_endpoint: None,
			capabilities: Capabilities::default(),
			rpc_timeout: Self::DEFAULT_RPC_TIMEOUT,
			handshake_timeout: Self::DEFAULT_HANDSHAKE_TIMEOUT,
			replenish_interval: Self::DEFAULT_REPLENISH_INTERVAL,
			flush_interval: Self::DEFAULT_FLUSH_INTERVAL,
			expiring_soon_window: Self::DEFAULT_EXPIRING_SOON_WINDOW,
			default_lease_duration: Self::DEFAULT_LEASE_DURATION,
			refill_threshold: Self::DEFAULT_REFILL_THRESHOLD,
			guards: HashMap::new(),
		}
	}
}

/// Generates a random client identifier of the form `quota-guard-<16 hex digits>`.
pub fn generate_client_id() -> String {
	format!("quota-guard-{:016x}", rand::random::<u64>())
}

/// Converts a [`Duration`] into the std flavor used by Tokio timers, clamping negatives to zero.
pub(crate) fn std_duration(duration: Duration) -> std::time::Duration {
	std::time::Duration::try_from(duration).unwrap_or_default()
}

fn ensure_positive(field: &'static str, value: Duration) -> Result<(), ConfigError> {
	if value.is_positive() { Ok(()) } else { Err(ConfigError::NonPositiveDuration { field }) }
}

mod millis {
	// crates.io
	use serde::{Deserialize, Deserializer, Serializer};
	use time::Duration;

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let millis = i64::try_from(value.whole_milliseconds()).unwrap_or(i64::MAX);

		serializer.serialize_i64(millis)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(Duration::milliseconds)
	}
}
