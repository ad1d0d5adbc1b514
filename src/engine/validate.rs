//! Ingress token validation against the Hub.

// self
use crate::{
	engine::Engine,
	hub::{self, TokenInfo},
	lease::LeaseToken,
};

impl Engine {
	/// Checks the tokens an inbound caller presented to `guard`.
	///
	/// Returns `true` when validation is not `required`, when no Hub is connected, or when the
	/// Hub call fails. Otherwise the request is valid only if tokens were presented and the Hub
	/// returned a valid verdict for every one of them.
	pub async fn validate_tokens(&self, guard: &str, tokens: &[LeaseToken], required: bool) -> bool {
		if !required {
			return true;
		}
		if tokens.is_empty() {
			log_event!(debug, guard, "No ingress tokens presented.");

			return false;
		}

		let Some(client) = self.hub.current() else {
			return true;
		};
		let infos = tokens
			.iter()
			.map(|token| TokenInfo {
				token: token.clone(),
				guard_name: guard.to_owned(),
				environment: self.config.environment.clone(),
			})
			.collect();
		let call = client.validate_token(infos);

		match hub::with_deadline(self.config.rpc_timeout, call).await {
			Ok(verdicts) =>
				verdicts.len() >= tokens.len() && verdicts.iter().all(|verdict| verdict.valid),
			Err(e) => {
				log_event!(error, guard, error = %e, "Token validation failed; admitting.");

				true
			},
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::*, config::EngineConfig, hub::HubCall};

	fn tokens(values: &[&str]) -> Vec<LeaseToken> {
		values.iter().copied().map(LeaseToken::new).collect()
	}

	#[tokio::test]
	async fn not_required_skips_hub() {
		let (engine, hub) = build_memory_engine(EngineConfig::default());

		assert!(engine.validate_tokens("api", &[], false).await);
		assert!(hub.validation_requests().is_empty());
	}

	#[tokio::test]
	async fn missing_tokens_are_invalid_when_required() {
		let (engine, _hub) = build_memory_engine(EngineConfig::default());

		assert!(!engine.validate_tokens("api", &[], true).await);
	}

	#[tokio::test]
	async fn one_invalid_token_fails_the_set() {
		let (engine, hub) = build_memory_engine(EngineConfig::new("prod"));

		hub.set_token_validity("good", true);
		hub.set_token_validity("bad", false);

		assert!(engine.validate_tokens("api", &tokens(&["good"]), true).await);
		assert!(!engine.validate_tokens("api", &tokens(&["good", "bad"]), true).await);

		let requests = hub.validation_requests();

		assert_eq!(requests[1].len(), 2);
		assert_eq!(requests[1][0].environment, "prod");
		assert_eq!(requests[1][0].guard_name, "api");
	}

	#[tokio::test]
	async fn hub_failure_admits() {
		let (engine, hub) = build_memory_engine(EngineConfig::default());

		hub.fail_next(HubCall::Validate, 1);

		assert!(engine.validate_tokens("api", &tokens(&["unknown"]), true).await);
	}

	#[tokio::test]
	async fn disconnected_engine_admits() {
		let engine = Engine::new(EngineConfig::default());

		assert!(engine.validate_tokens("api", &tokens(&["any"]), true).await);
	}
}
