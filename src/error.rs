//! Engine-level error types shared across configuration, startup, and Hub transports.
//!
//! Quota and validation decisions never return these errors to callers; transport failures
//! there degrade to "allow". Only construction-time APIs (config parsing, startup, client
//! handshakes) and the raw [`QuotaServiceClient`](crate::hub::QuotaServiceClient) surface
//! them.

// self
use crate::_prelude::*;

/// Engine-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration or lifecycle problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Control-plane call failed.
	#[error(transparent)]
	Hub(#[from] HubError),
}

/// Configuration and lifecycle failures raised by the engine.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// Configuration document could not be parsed.
	#[error("Engine configuration is malformed at `{path}`.")]
	Parse {
		/// Dotted path to the offending field.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: serde_json::Error,
	},
	/// A duration setting must be positive.
	#[error("The {field} setting must be positive.")]
	NonPositiveDuration {
		/// Name of the offending setting.
		field: &'static str,
	},
	/// Refill threshold must sit in `[0, 1]`.
	#[error("The refill threshold must be within [0, 1], got {value}.")]
	RefillThresholdOutOfRange {
		/// Supplied threshold.
		value: f64,
	},
	/// Environment name cannot be empty.
	#[error("The environment name cannot be empty.")]
	EmptyEnvironment,
	/// Hub endpoint is required for network-backed clients.
	#[error("No Hub endpoint is configured.")]
	MissingHubEndpoint,
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Background tasks were already started for this engine.
	#[error("Background tasks are already running for this engine.")]
	AlreadyStarted,
	/// Background tasks need a Tokio runtime.
	#[error("Background tasks require a running Tokio runtime.")]
	NoRuntime,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Failures reported by a [`QuotaServiceClient`](crate::hub::QuotaServiceClient).
#[derive(Debug, ThisError)]
pub enum HubError {
	/// Network-level failure (DNS, TCP, TLS, connection reset).
	#[error("Network error occurred while calling the Hub.")]
	Transport {
		/// Transport-specific error.
		#[source]
		source: BoxError,
	},
	/// Call did not complete within its deadline.
	#[error("Hub call exceeded its {}ms deadline.", .deadline.whole_milliseconds())]
	DeadlineExceeded {
		/// Deadline that elapsed.
		deadline: Duration,
	},
	/// Hub answered with a non-success status.
	#[error("Hub returned status {status}: {message}.")]
	Status {
		/// HTTP (or RPC) status code.
		status: u16,
		/// Hub-supplied message.
		message: String,
	},
	/// Hub response body could not be decoded.
	#[error("Hub response is malformed at `{path}`.")]
	Decode {
		/// Dotted path to the offending field.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: serde_json::Error,
	},
	/// Injected or otherwise synthetic failure raised by in-process hubs.
	#[error("Hub is unavailable: {reason}.")]
	Unavailable {
		/// Why the hub refused the call.
		reason: String,
	},
}
impl HubError {
	/// Wraps a transport-specific network error.
	pub fn transport(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Transport { source: Box::new(src) }
	}

	/// Converts a `serde_path_to_error` failure into [`HubError::Decode`].
	pub fn decode(err: serde_path_to_error::Error<serde_json::Error>) -> Self {
		let path = err.path().to_string();

		Self::Decode { path, source: err.into_inner() }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for HubError {
	fn from(e: ReqwestError) -> Self {
		Self::transport(e)
	}
}
