//! Promise adapter: chainable continuation values.
//!
//! A promise settles once. Continuations registered before settlement run on
//! the thread that settles it; continuations registered afterwards run
//! immediately on the registering thread. Neither the registry lock nor the
//! promise's own lock is held while a continuation runs.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{LocatorError, panic_message};
use crate::key::{ServiceKey, downcast};
use crate::locator::{Locator, RequestOptions};

type Callback<T> = Box<dyn FnOnce(crate::Result<T>) + Send>;

enum PromiseState<T> {
	Pending(Vec<Callback<T>>),
	Settled(crate::Result<T>),
}

struct PromiseCell<T> {
	state: Mutex<PromiseState<T>>,
}

impl<T: Clone + Send + 'static> PromiseCell<T> {
	fn pending() -> Arc<Self> {
		Arc::new(Self {
			state: Mutex::new(PromiseState::Pending(Vec::new())),
		})
	}

	/// First settlement wins; later calls are no-ops returning `false`.
	fn settle(&self, outcome: crate::Result<T>) -> bool {
		let callbacks = {
			let mut state = self.state.lock();
			let PromiseState::Pending(callbacks) = &mut *state else {
				return false;
			};
			let callbacks = std::mem::take(callbacks);
			*state = PromiseState::Settled(outcome.clone());
			callbacks
		};
		for callback in callbacks {
			observe(callback, outcome.clone());
		}
		true
	}

	fn subscribe(&self, callback: Callback<T>) {
		let settled = {
			let mut state = self.state.lock();
			match &mut *state {
				PromiseState::Pending(callbacks) => {
					callbacks.push(callback);
					return;
				}
				PromiseState::Settled(outcome) => outcome.clone(),
			}
		};
		observe(callback, settled);
	}
}

/// Runs one settlement callback; a panicking observer must not keep the
/// remaining observers (or the settling registry call) from completing.
fn observe<T>(callback: Callback<T>, outcome: crate::Result<T>) {
	if let Err(payload) = catch_unwind(AssertUnwindSafe(move || callback(outcome))) {
		tracing::error!(panic = %panic_message(payload), "locator.promise.observer_panicked");
	}
}

/// Settling side of a promise. Dropping it unsettled cancels the promise.
pub(crate) struct PromiseResolver<T: Clone + Send + 'static> {
	cell: Arc<PromiseCell<T>>,
}

impl<T: Clone + Send + 'static> PromiseResolver<T> {
	pub(crate) fn settle(self, outcome: crate::Result<T>) -> bool {
		self.cell.settle(outcome)
	}
}

impl<T: Clone + Send + 'static> Drop for PromiseResolver<T> {
	fn drop(&mut self) {
		self.cell.settle(Err(LocatorError::Cancelled));
	}
}

/// Chainable single-settlement value.
pub struct ServicePromise<T> {
	cell: Arc<PromiseCell<T>>,
}

impl<T> Clone for ServicePromise<T> {
	fn clone(&self) -> Self {
		Self {
			cell: Arc::clone(&self.cell),
		}
	}
}

impl<T> fmt::Debug for ServicePromise<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let pending = matches!(&*self.cell.state.lock(), PromiseState::Pending(_));
		f.debug_struct("ServicePromise").field("pending", &pending).finish()
	}
}

impl<T: Clone + Send + 'static> ServicePromise<T> {
	pub(crate) fn pending() -> (Self, PromiseResolver<T>) {
		let cell = PromiseCell::pending();
		(
			Self { cell: Arc::clone(&cell) },
			PromiseResolver { cell },
		)
	}

	pub fn resolved(value: T) -> Self {
		let cell = PromiseCell::pending();
		cell.settle(Ok(value));
		Self { cell }
	}

	pub fn rejected(error: LocatorError) -> Self {
		let cell = PromiseCell::pending();
		cell.settle(Err(error));
		Self { cell }
	}

	pub fn is_pending(&self) -> bool {
		matches!(&*self.cell.state.lock(), PromiseState::Pending(_))
	}

	/// Returns the settled outcome, or `None` while pending.
	pub fn outcome(&self) -> Option<crate::Result<T>> {
		match &*self.cell.state.lock() {
			PromiseState::Pending(_) => None,
			PromiseState::Settled(outcome) => Some(outcome.clone()),
		}
	}

	/// Runs `f` with the outcome once settled.
	pub fn on_settle<F>(&self, f: F)
	where
		F: FnOnce(crate::Result<T>) + Send + 'static,
	{
		self.cell.subscribe(Box::new(f));
	}

	/// Chains a continuation on resolution.
	///
	/// The returned promise resolves with `f`'s value or rejects with its
	/// error. A rejection of `self` skips `f` and propagates unchanged. A panic
	/// inside `f` rejects with [`LocatorError::Continuation`].
	pub fn then<U, F>(&self, f: F) -> ServicePromise<U>
	where
		U: Clone + Send + 'static,
		F: FnOnce(T) -> crate::Result<U> + Send + 'static,
	{
		let (next, resolver) = ServicePromise::pending();
		self.cell.subscribe(Box::new(move |outcome| {
			let chained = match outcome {
				Ok(value) => guarded(move || f(value)),
				Err(error) => Err(error),
			};
			resolver.settle(chained);
		}));
		next
	}

	/// Handles a rejection.
	///
	/// Resolves with `Some(value)` when `self` resolves, with `None` once
	/// `handler` absorbs a rejection, or rejects with the handler's own error.
	pub fn catch<F>(&self, handler: F) -> ServicePromise<Option<T>>
	where
		F: FnOnce(&LocatorError) -> crate::Result<()> + Send + 'static,
	{
		let (next, resolver) = ServicePromise::pending();
		self.cell.subscribe(Box::new(move |outcome| {
			let chained = match outcome {
				Ok(value) => Ok(Some(value)),
				Err(error) => guarded(move || handler(&error)).map(|()| None),
			};
			resolver.settle(chained);
		}));
		next
	}

	/// Handles a rejection by supplying a replacement value.
	pub fn recover<F>(&self, handler: F) -> ServicePromise<T>
	where
		F: FnOnce(LocatorError) -> crate::Result<T> + Send + 'static,
	{
		let (next, resolver) = ServicePromise::pending();
		self.cell.subscribe(Box::new(move |outcome| {
			let chained = match outcome {
				Ok(value) => Ok(value),
				Err(error) => guarded(move || handler(error)),
			};
			resolver.settle(chained);
		}));
		next
	}

	/// Waits asynchronously for settlement.
	pub async fn settled(&self) -> crate::Result<T> {
		let (tx, rx) = oneshot::channel();
		self.on_settle(move |outcome| {
			let _ = tx.send(outcome);
		});
		rx.await.unwrap_or(Err(LocatorError::Cancelled))
	}
}

fn guarded<R>(f: impl FnOnce() -> crate::Result<R>) -> crate::Result<R> {
	match catch_unwind(AssertUnwindSafe(f)) {
		Ok(result) => result,
		Err(payload) => {
			let message = panic_message(payload);
			tracing::warn!(%message, "locator.promise.continuation_panicked");
			Err(LocatorError::Continuation(message))
		}
	}
}

impl Locator {
	/// Requests the service for `T` as a promise.
	pub fn get_promise<T: Send + Sync + 'static>(&self, options: impl Into<RequestOptions>) -> ServicePromise<Arc<T>> {
		let (promise, resolver) = ServicePromise::pending();
		self.admit(
			ServiceKey::of::<T>(),
			&options.into(),
			Box::new(move |settlement| {
				resolver.settle(settlement.and_then(downcast::<T>));
			}),
		);
		promise
	}
}

#[cfg(test)]
mod tests;
