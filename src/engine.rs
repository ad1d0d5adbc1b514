//! The admission engine: shared lease state plus the background tasks that keep it warm.

pub mod batcher;
pub mod quota;
pub mod replenish;
pub mod validate;

pub use batcher::*;
pub use quota::*;
pub use replenish::*;
pub use validate::*;

// std
use std::sync::atomic::{AtomicBool, Ordering};
// crates.io
use tokio_util::{sync::CancellationToken, task::TaskTracker};
// self
use crate::{
	_prelude::*,
	config::{self, EngineConfig},
	error::ConfigError,
	ext::{LocalPolicy, PermissivePolicy},
	guard::GuardMetrics,
	hub::{HubSlot, QuotaServiceClient},
	lease::{LeaseRegistry, PoolSnapshot},
};

/// Coordinates quota decisions, token validation, and consumption reporting for one process.
///
/// The engine is cheap to clone; every clone shares the same lease registry, Hub slot,
/// consumption queue, and counters. Background replenishment and reporting are started
/// explicitly through [`Engine::spawn_background`].
#[derive(Clone)]
pub struct Engine {
	/// Configuration the engine was built with; checked again by [`Engine::spawn_background`].
	pub config: Arc<EngineConfig>,
	/// Slot holding the connected Hub client, if any.
	pub hub: Arc<HubSlot>,
	/// Local policy consulted before any network check.
	pub policy: Arc<dyn LocalPolicy>,
	/// Per-guard lease pools.
	pub registry: Arc<LeaseRegistry>,
	/// Shared counters for guard outcomes.
	pub metrics: Arc<GuardMetrics>,
	client_id: Arc<str>,
	consumed: Arc<ConsumedTokenQueue>,
	started: Arc<AtomicBool>,
}
impl Engine {
	/// Creates a disconnected engine that admits everything locally.
	///
	/// A client identifier is generated when the configuration does not carry one.
	pub fn new(config: EngineConfig) -> Self {
		let client_id = config.client_id.clone().unwrap_or_else(config::generate_client_id);

		Self {
			config: Arc::new(config),
			hub: Default::default(),
			policy: Arc::new(PermissivePolicy),
			registry: Default::default(),
			metrics: Default::default(),
			client_id: client_id.into(),
			consumed: Default::default(),
			started: Default::default(),
		}
	}

	/// Installs a connected Hub client.
	pub fn with_hub(self, client: Arc<dyn QuotaServiceClient>) -> Self {
		self.hub.connect(client);

		self
	}

	/// Replaces the local policy gate.
	pub fn with_policy(mut self, policy: Arc<dyn LocalPolicy>) -> Self {
		self.policy = policy;

		self
	}

	/// Identifier this process presents to the Hub.
	pub fn client_id(&self) -> &str {
		&self.client_id
	}

	/// Usage counters for `guard`'s pool, if the pool exists yet.
	pub fn pool_snapshot(&self, guard: &str) -> Option<PoolSnapshot> {
		self.registry.get(guard).map(|pool| pool.snapshot())
	}

	/// Number of consumed tokens waiting to be reported.
	pub fn pending_reports(&self) -> usize {
		self.consumed.len()
	}

	/// Starts the replenishment and consumption-reporting loops on the current Tokio runtime.
	///
	/// The configuration is validated first, so a bad tick interval surfaces here instead of
	/// inside a loop. Only one set of loops may run per engine; a second call fails with
	/// [`ConfigError::AlreadyStarted`].
	pub fn spawn_background(&self) -> Result<Supervisor> {
		if tokio::runtime::Handle::try_current().is_err() {
			return Err(ConfigError::NoRuntime.into());
		}

		self.config.validate()?;

		if self.started.swap(true, Ordering::AcqRel) {
			return Err(ConfigError::AlreadyStarted.into());
		}

		let token = CancellationToken::new();
		let tracker = TaskTracker::new();

		tracker.spawn(replenish::run(self.clone(), token.clone(), tracker.clone()));
		tracker.spawn(batcher::run(self.clone(), token.clone()));

		log_event!(
			info,
			client_id = %self.client_id,
			environment = %self.config.environment,
			"Started quota guard background tasks."
		);

		Ok(Supervisor { token, tracker })
	}
}
impl Debug for Engine {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Engine")
			.field("environment", &self.config.environment)
			.field("client_id", &self.client_id)
			.field("hub", &self.hub)
			.field("pools", &self.registry.len())
			.field("pending_reports", &self.consumed.len())
			.finish()
	}
}

/// Handle to the background loops started by [`Engine::spawn_background`].
///
/// Dropping the supervisor cancels the loops without waiting for them; call
/// [`Supervisor::shutdown`] to wait for the final consumption flush.
#[derive(Debug)]
pub struct Supervisor {
	token: CancellationToken,
	tracker: TaskTracker,
}
impl Supervisor {
	/// Token cancelled when the loops are asked to stop.
	pub fn cancellation_token(&self) -> CancellationToken {
		self.token.clone()
	}

	/// Cancels every loop and waits for in-flight work, including the final flush.
	pub async fn shutdown(self) {
		self.token.cancel();
		self.tracker.close();
		self.tracker.wait().await;
	}
}
impl Drop for Supervisor {
	fn drop(&mut self) {
		self.token.cancel();
	}
}
