//! In-process [`QuotaServiceClient`] for local development and tests.
//!
//! Leases come from scripted batches (served first, per guard) or from per-feature budgets.
//! Every call is recorded, and any call kind can be made to fail a fixed number of times.

// self
use crate::{
	_prelude::*,
	error::HubError,
	hub::{HubFuture, LeaseSelector, QuotaServiceClient, TokenInfo, TokenValidity},
	lease::{IssuedLease, LeaseBatch, LeaseToken},
};

/// Hub operations that can be faulted independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HubCall {
	/// [`QuotaServiceClient::get_token_lease`].
	Lease,
	/// [`QuotaServiceClient::set_token_lease_consumed`].
	Report,
	/// [`QuotaServiceClient::validate_token`].
	Validate,
}
impl HubCall {
	/// Returns a stable label suitable for error messages.
	pub const fn as_str(self) -> &'static str {
		match self {
			HubCall::Lease => "lease",
			HubCall::Report => "report",
			HubCall::Validate => "validate",
		}
	}
}

#[derive(Debug)]
struct Budget {
	remaining: u64,
	batch_size: usize,
	minted: u64,
}

#[derive(Debug, Default)]
struct MemoryHubState {
	scripted: HashMap<String, VecDeque<LeaseBatch>>,
	budgets: BTreeMap<(String, String), Budget>,
	validity: HashMap<String, bool>,
	faults: HashMap<HubCall, usize>,
	lease_requests: Vec<LeaseSelector>,
	report_attempts: Vec<Vec<String>>,
	reported: Vec<Vec<String>>,
	validation_requests: Vec<Vec<TokenInfo>>,
}

/// Thread-safe hub that keeps all state in-process.
#[derive(Debug, Default)]
pub struct MemoryHub {
	state: Mutex<MemoryHubState>,
	latency: Option<Duration>,
	lease_duration: Option<Duration>,
}
impl MemoryHub {
	/// Delays every call by `latency` before answering.
	pub fn with_latency(mut self, latency: Duration) -> Self {
		self.latency = Some(latency);

		self
	}

	/// Attaches a lifetime hint to every minted batch.
	pub fn with_lease_duration(mut self, duration: Duration) -> Self {
		self.lease_duration = Some(duration);

		self
	}

	/// Queues a batch to be returned by the next lease request for `guard`.
	pub fn push_batch(&self, guard: impl Into<String>, batch: LeaseBatch) {
		self.state.lock().scripted.entry(guard.into()).or_default().push_back(batch);
	}

	/// Sets the number of leases the hub may still mint for `guard`/`feature`, handing out at
	/// most `batch_size` per request.
	pub fn set_budget(
		&self,
		guard: impl Into<String>,
		feature: impl Into<String>,
		remaining: u64,
		batch_size: usize,
	) {
		self.state
			.lock()
			.budgets
			.insert((guard.into(), feature.into()), Budget { remaining, batch_size, minted: 0 });
	}

	/// Marks `token` as valid or invalid for validation calls. Unknown tokens are invalid.
	pub fn set_token_validity(&self, token: impl Into<String>, valid: bool) {
		self.state.lock().validity.insert(token.into(), valid);
	}

	/// Makes the next `count` calls of kind `call` fail with [`HubError::Unavailable`].
	pub fn fail_next(&self, call: HubCall, count: usize) {
		self.state.lock().faults.insert(call, count);
	}

	/// Selectors received so far.
	pub fn lease_requests(&self) -> Vec<LeaseSelector> {
		self.state.lock().lease_requests.clone()
	}

	/// Every consumption batch received, including ones that were faulted.
	pub fn report_attempts(&self) -> Vec<Vec<String>> {
		self.state.lock().report_attempts.clone()
	}

	/// Consumption batches that were accepted.
	pub fn reported(&self) -> Vec<Vec<String>> {
		self.state.lock().reported.clone()
	}

	/// Validation batches received so far.
	pub fn validation_requests(&self) -> Vec<Vec<TokenInfo>> {
		self.state.lock().validation_requests.clone()
	}

	async fn answer<T>(
		&self,
		call: HubCall,
		respond: impl FnOnce(&mut MemoryHubState) -> T,
	) -> Result<T, HubError> {
		if let Some(latency) = self.latency {
			tokio::time::sleep(crate::config::std_duration(latency)).await;
		}

		let mut state = self.state.lock();

		if let Some(remaining) = state.faults.get_mut(&call).filter(|remaining| **remaining > 0) {
			*remaining -= 1;

			return Err(HubError::Unavailable {
				reason: format!("injected {} fault", call.as_str()),
			});
		}

		Ok(respond(&mut state))
	}

	fn mint(&self, state: &mut MemoryHubState, selector: &LeaseSelector) -> LeaseBatch {
		if let Some(batch) =
			state.scripted.get_mut(&selector.guard_name).and_then(VecDeque::pop_front)
		{
			return batch;
		}

		let mut leases = Vec::new();

		for ((guard, feature), budget) in state.budgets.iter_mut() {
			if guard != &selector.guard_name
				|| selector.feature_name.as_ref().is_some_and(|wanted| wanted != feature)
			{
				continue;
			}

			let count = budget.remaining.min(budget.batch_size as u64);

			for _ in 0..count {
				budget.minted += 1;
				leases.push(IssuedLease {
					token: LeaseToken::new(format!("{guard}-{feature}-{}", budget.minted)),
					feature: feature.clone(),
					priority_boost: 0,
					weight: 1.0,
					expires_at: None,
				});
			}

			budget.remaining -= count;
		}

		LeaseBatch { leases, duration: self.lease_duration }
	}
}
impl QuotaServiceClient for MemoryHub {
	fn get_token_lease(&self, selector: LeaseSelector) -> HubFuture<'_, LeaseBatch> {
		Box::pin(async move {
			self.answer(HubCall::Lease, |state| {
				let batch = self.mint(state, &selector);

				state.lease_requests.push(selector);

				batch
			})
			.await
		})
	}

	fn set_token_lease_consumed(&self, tokens: Vec<String>) -> HubFuture<'_, ()> {
		Box::pin(async move {
			self.state.lock().report_attempts.push(tokens.clone());
			self.answer(HubCall::Report, |state| state.reported.push(tokens)).await
		})
	}

	fn validate_token(&self, tokens: Vec<TokenInfo>) -> HubFuture<'_, Vec<TokenValidity>> {
		Box::pin(async move {
			self.answer(HubCall::Validate, |state| {
				let verdicts = tokens
					.iter()
					.map(|info| TokenValidity {
						token: info.token.clone(),
						valid: state.validity.get(info.token.expose()).copied().unwrap_or(false),
					})
					.collect();

				state.validation_requests.push(tokens);

				verdicts
			})
			.await
		})
	}
}
