//! Consumption reporting: handed-out tokens are queued and flushed to the Hub in batches.

// crates.io
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
// self
use crate::{_prelude::*, config, engine::Engine, hub};

/// Tokens handed out locally that the Hub has not acknowledged yet.
#[derive(Debug, Default)]
pub struct ConsumedTokenQueue(Mutex<Vec<String>>);
impl ConsumedTokenQueue {
	/// Queues a consumed token.
	pub fn push(&self, token: String) {
		self.0.lock().push(token);
	}

	/// Atomically takes every queued token, leaving the queue empty.
	pub fn take(&self) -> Vec<String> {
		std::mem::take(&mut *self.0.lock())
	}

	/// Puts back a batch that could not be delivered.
	pub fn requeue(&self, tokens: Vec<String>) {
		let mut queue = self.0.lock();
		let newer = std::mem::replace(&mut *queue, tokens);

		queue.extend(newer);
	}

	/// Number of queued tokens.
	pub fn len(&self) -> usize {
		self.0.lock().len()
	}

	/// Returns `true` if nothing is queued.
	pub fn is_empty(&self) -> bool {
		self.0.lock().is_empty()
	}
}

/// Result of one flush attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
	/// Nothing was queued.
	Idle,
	/// The Hub acknowledged this many tokens.
	Delivered(usize),
	/// This many tokens went back on the queue.
	Requeued(usize),
}

impl Engine {
	/// Sends every queued consumed token to the Hub in one call.
	///
	/// The batch is re-queued when no Hub is connected or the call fails, so tokens are never
	/// dropped while the engine is alive.
	pub async fn flush_consumed(&self) -> FlushOutcome {
		let batch = self.consumed.take();

		if batch.is_empty() {
			return FlushOutcome::Idle;
		}

		let count = batch.len();
		let Some(client) = self.hub.current() else {
			self.consumed.requeue(batch);

			return FlushOutcome::Requeued(count);
		};
		let call = client.set_token_lease_consumed(batch.clone());

		match hub::with_deadline(self.config.rpc_timeout, call).await {
			Ok(()) => {
				log_event!(trace, count, "Reported consumed tokens.");

				FlushOutcome::Delivered(count)
			},
			Err(e) => {
				log_event!(warn, count, error = %e, "Consumption report failed; re-queued.");

				self.consumed.requeue(batch);

				FlushOutcome::Requeued(count)
			},
		}
	}
}

pub(crate) async fn run(engine: Engine, token: CancellationToken) {
	let mut interval = tokio::time::interval(config::std_duration(engine.config.flush_interval));

	interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			() = token.cancelled() => break,
			_ = interval.tick() => {
				engine.flush_consumed().await;
			},
		}
	}

	let outcome = engine.flush_consumed().await;

	if matches!(outcome, FlushOutcome::Requeued(_)) {
		log_event!(warn, ?outcome, "Final consumption flush did not reach the Hub.");
	}
}
