//! Step-iterator adapter: a lazy, caller-driven poll sequence.
//!
//! A [`Stepwise`] has no execution context of its own. Each [`Stepwise::step`]
//! call checks whether the request settled and either yields
//! [`Step::Pending`] or hands the outcome to `on_value` and completes. Every
//! failure kind collapses into `on_value(None)`.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::key::{ServiceKey, downcast};
use crate::ledger::Settlement;
use crate::locator::{Locator, RequestOptions, Ticket};

/// Result of advancing a [`Stepwise`] once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
	/// Nothing to deliver yet; step again later.
	Pending,
	/// `on_value` has run; further steps are no-ops until [`Stepwise::restart`].
	Complete,
}

enum Phase {
	Idle,
	Waiting {
		slot: Arc<Mutex<Option<Settlement>>>,
		ticket: Option<Ticket>,
	},
	Finished,
}

/// Restartable step sequence returned by [`Locator::get_stepwise`].
///
/// Nothing reaches the ledger until the first step. Dropping a pending
/// sequence withdraws its request.
pub struct Stepwise<T, F> {
	locator: Locator,
	options: RequestOptions,
	on_value: F,
	phase: Phase,
	_marker: PhantomData<fn() -> T>,
}

impl<T, F> Stepwise<T, F>
where
	T: Send + Sync + 'static,
	F: FnMut(Option<Arc<T>>),
{
	/// Advances the sequence once.
	pub fn step(&mut self) -> Step {
		if matches!(self.phase, Phase::Idle) {
			self.arm();
		}
		let Phase::Waiting { slot, ticket } = &mut self.phase else {
			return Step::Complete;
		};

		let settled = slot.lock().take();
		let value = match settled {
			Some(Ok(service)) => downcast::<T>(service).ok(),
			Some(Err(error)) => {
				tracing::trace!(service = ServiceKey::of::<T>().name(), %error, "locator.stepwise.failed");
				None
			}
			None => match self.locator.try_get::<T>() {
				Some(service) => {
					if let Some(ticket) = ticket.take() {
						ticket.withdraw();
					}
					Some(service)
				}
				None => return Step::Pending,
			},
		};

		self.phase = Phase::Finished;
		(self.on_value)(value);
		Step::Complete
	}

	fn arm(&mut self) {
		let slot = Arc::new(Mutex::new(None));
		let sink = Arc::clone(&slot);
		let ticket = self.locator.admit(
			ServiceKey::of::<T>(),
			&self.options,
			Box::new(move |settlement| {
				*sink.lock() = Some(settlement);
			}),
		);
		self.phase = Phase::Waiting { slot, ticket };
	}
}

impl<T, F> Stepwise<T, F> {
	/// Re-arms the sequence. A still-queued request is withdrawn; the next
	/// step enqueues a fresh one.
	pub fn restart(&mut self) {
		self.withdraw();
		self.phase = Phase::Idle;
	}

	pub fn is_finished(&self) -> bool {
		matches!(self.phase, Phase::Finished)
	}

	fn withdraw(&mut self) {
		if let Phase::Waiting { ticket: Some(ticket), .. } = &self.phase {
			ticket.withdraw();
		}
	}
}

impl<T, F> Iterator for Stepwise<T, F>
where
	T: Send + Sync + 'static,
	F: FnMut(Option<Arc<T>>),
{
	type Item = Step;

	fn next(&mut self) -> Option<Step> {
		if self.is_finished() {
			return None;
		}
		Some(self.step())
	}
}

impl<T, F> Drop for Stepwise<T, F> {
	fn drop(&mut self) {
		self.withdraw();
	}
}

impl<T, F> fmt::Debug for Stepwise<T, F> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let phase = match self.phase {
			Phase::Idle => "idle",
			Phase::Waiting { .. } => "waiting",
			Phase::Finished => "finished",
		};
		f.debug_struct("Stepwise").field("phase", &phase).finish()
	}
}

impl Locator {
	/// Requests the service for `T` as a step sequence that calls `on_value`
	/// once it completes.
	pub fn get_stepwise<T, F>(&self, on_value: F) -> Stepwise<T, F>
	where
		T: Send + Sync + 'static,
		F: FnMut(Option<Arc<T>>),
	{
		self.get_stepwise_with(RequestOptions::new(), on_value)
	}

	pub fn get_stepwise_with<T, F>(&self, options: impl Into<RequestOptions>, on_value: F) -> Stepwise<T, F>
	where
		T: Send + Sync + 'static,
		F: FnMut(Option<Arc<T>>),
	{
		Stepwise {
			locator: self.clone(),
			options: options.into(),
			on_value,
			phase: Phase::Idle,
			_marker: PhantomData,
		}
	}
}
