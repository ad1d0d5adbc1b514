//! Control-plane ("Hub") contracts and built-in clients.
//!
//! [`QuotaServiceClient`] is the engine's only dependency on the Hub. The engine reaches the
//! current client through a [`HubSlot`], which is empty while the process is disconnected;
//! every stage that needs the Hub treats an empty slot as "capability absent" and allows.

#[cfg(feature = "reqwest")] pub mod http;
pub mod memory;

#[cfg(feature = "reqwest")] pub use http::ReqwestHubClient;
pub use memory::{HubCall, MemoryHub};

// self
use crate::{
	_prelude::*,
	error::HubError,
	lease::{LeaseBatch, LeaseToken},
};

/// Boxed future returned by [`QuotaServiceClient`] methods.
pub type HubFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, HubError>> + 'a + Send>>;

/// Quota service operations offered by the Hub.
pub trait QuotaServiceClient
where
	Self: Send + Sync,
{
	/// Requests a batch of leases matching `selector`.
	fn get_token_lease(&self, selector: LeaseSelector) -> HubFuture<'_, LeaseBatch>;

	/// Reports tokens that were consumed locally.
	fn set_token_lease_consumed(&self, tokens: Vec<String>) -> HubFuture<'_, ()>;

	/// Validates ingress tokens, returning one verdict per token.
	fn validate_token(&self, tokens: Vec<TokenInfo>) -> HubFuture<'_, Vec<TokenValidity>>;
}

/// Describes which leases the caller wants.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseSelector {
	/// Deployment environment.
	pub environment: String,
	/// Guard (decorator) the leases are for.
	pub guard_name: String,
	/// Feature filter; `None` requests leases for every feature of the guard.
	pub feature_name: Option<String>,
	/// Selector tags; tagged requests are never served from the shared cache.
	pub tags: BTreeMap<String, String>,
	/// Priority boost of the request.
	pub priority_boost: i32,
	/// Identifier of this process.
	pub client_id: String,
}

/// Token submitted for validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
	/// Token presented by the caller.
	pub token: LeaseToken,
	/// Guard the token is presented to.
	pub guard_name: String,
	/// Deployment environment.
	pub environment: String,
}

/// Hub verdict for a single token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenValidity {
	/// Token the verdict refers to.
	pub token: LeaseToken,
	/// Whether the Hub accepts the token.
	pub valid: bool,
}

/// Holder for the currently connected Hub client, if any.
///
/// A connectivity loop outside this crate calls [`HubSlot::connect`] and
/// [`HubSlot::disconnect`] as the control-plane link comes and goes.
#[derive(Default)]
pub struct HubSlot(RwLock<Option<Arc<dyn QuotaServiceClient>>>);
impl HubSlot {
	/// Installs (or replaces) the connected client.
	pub fn connect(&self, client: Arc<dyn QuotaServiceClient>) {
		*self.0.write() = Some(client);
	}

	/// Clears the client, returning the one that was installed.
	pub fn disconnect(&self) -> Option<Arc<dyn QuotaServiceClient>> {
		self.0.write().take()
	}

	/// Returns the connected client, if any.
	pub fn current(&self) -> Option<Arc<dyn QuotaServiceClient>> {
		self.0.read().clone()
	}

	/// Returns `true` while a client is installed.
	pub fn is_connected(&self) -> bool {
		self.0.read().is_some()
	}
}
impl Debug for HubSlot {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HubSlot").field("connected", &self.is_connected()).finish()
	}
}

/// Awaits `call`, converting an elapsed `deadline` into [`HubError::DeadlineExceeded`].
pub async fn with_deadline<T>(deadline: Duration, call: HubFuture<'_, T>) -> Result<T, HubError> {
	match tokio::time::timeout(crate::config::std_duration(deadline), call).await {
		Ok(result) => result,
		Err(_) => Err(HubError::DeadlineExceeded { deadline }),
	}
}
