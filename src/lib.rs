//! Fault-tolerant admission control for guarded operations: local policy gates, Hub-issued
//! quota leases cached per process, and ingress token validation that never blocks a request
//! on a slow control plane.
//!
//! The entry point is [`engine::Engine`]. Construct one per process (or per test), attach a
//! [`hub::QuotaServiceClient`] and a [`ext::LocalPolicy`], call
//! [`Engine::spawn_background`](engine::Engine::spawn_background) once, and route every
//! guarded call through [`Engine::guard`](engine::Engine::guard).

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

macro_rules! log_event {
	($level:ident, $($arg:tt)+) => {{
		#[cfg(feature = "tracing")]
		{
			::tracing::$level!($($arg)+);
		}
	}};
}

pub mod config;
pub mod engine;
pub mod error;
pub mod ext;
pub mod guard;
pub mod hub;
pub mod lease;
pub mod obs;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for tests; enabled via `cfg(test)` or the `test`
	//! crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		config::EngineConfig,
		engine::Engine,
		hub::{MemoryHub, QuotaServiceClient},
		lease::{IssuedLease, LeaseToken},
	};

	/// Builds an engine wired to a fresh [`MemoryHub`], returning both so tests can seed
	/// budgets and inspect recorded calls.
	pub fn build_memory_engine(config: EngineConfig) -> (Engine, Arc<MemoryHub>) {
		let hub = Arc::new(MemoryHub::default());
		let client: Arc<dyn QuotaServiceClient> = hub.clone();
		let engine = Engine::new(config).with_hub(client);

		(engine, hub)
	}

	/// Issued lease fixture without an explicit expiry.
	pub fn issued(token: &str, feature: &str, priority_boost: i32) -> IssuedLease {
		IssuedLease {
			token: LeaseToken::new(token),
			feature: feature.into(),
			priority_boost,
			weight: 1.0,
			expires_at: None,
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
		time::Instant,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
