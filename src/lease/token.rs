//! Redacted lease token wrapper.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// Lease token that keeps the raw value out of logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseToken(String);
impl LeaseToken {
	/// Wraps a raw token string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the raw token. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Consumes the wrapper, returning the raw token.
	pub fn into_inner(self) -> String {
		self.0
	}

	/// Short, log-safe digest of the token (first 9 bytes of SHA-256, base64url).
	pub fn fingerprint(&self) -> String {
		let digest = Sha256::digest(self.0.as_bytes());

		URL_SAFE_NO_PAD.encode(&digest[..9])
	}
}
impl AsRef<str> for LeaseToken {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for LeaseToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("LeaseToken").field(&self.fingerprint()).finish()
	}
}
impl Display for LeaseToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn formatters_hide_the_raw_token() {
		let token = LeaseToken::new("super-secret");

		assert!(!format!("{token:?}").contains("super-secret"));
		assert_eq!(format!("{token}"), "<redacted>");
	}

	#[test]
	fn fingerprint_is_stable_and_short() {
		let a = LeaseToken::new("lease-a");

		assert_eq!(a.fingerprint(), LeaseToken::new("lease-a").fingerprint());
		assert_ne!(a.fingerprint(), LeaseToken::new("lease-b").fingerprint());
		assert_eq!(a.fingerprint().len(), 12);
	}
}
