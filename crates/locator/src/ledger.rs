//! Per-type ledger of requests made before a service existed.
//!
//! A waiter is present in the ledger if and only if it is pending. Whoever
//! removes a waiter (registration, rejection, cancellation, cleanup) owns it
//! and settles it exactly once, outside the registry lock.

use std::panic::{AssertUnwindSafe, catch_unwind};

use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

use crate::error::{LocatorError, panic_message};
use crate::key::{ScopeId, Service, ServiceKey};

/// Terminal outcome handed to a waiter's completion handle.
pub(crate) type Settlement = Result<Service, LocatorError>;

/// Adapter-specific completion handle.
pub(crate) type Completion = Box<dyn FnOnce(Settlement) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WaiterId(pub(crate) u64);

pub(crate) struct Waiter {
	pub(crate) id: WaiterId,
	pub(crate) scope: Option<ScopeId>,
	/// Cancelled once the waiter leaves the ledger, releasing its watcher.
	pub(crate) settled: CancellationToken,
	complete: Completion,
}

impl Waiter {
	pub(crate) fn new(id: WaiterId, scope: Option<ScopeId>, complete: Completion) -> Self {
		Self {
			id,
			scope,
			settled: CancellationToken::new(),
			complete,
		}
	}

	/// Runs the completion handle. Must not be called under the registry lock.
	pub(crate) fn settle(self, outcome: Settlement) {
		self.settled.cancel();
		complete_contained(self.complete, outcome);
	}

	/// Drops the waiter without notifying its (already gone) consumer.
	pub(crate) fn discard(self) {
		self.settled.cancel();
	}
}

/// Invokes a completion handle, containing a panic so the caller can keep
/// settling the remaining waiters. Returns `false` if it panicked.
pub(crate) fn complete_contained(complete: Completion, outcome: Settlement) -> bool {
	match catch_unwind(AssertUnwindSafe(move || complete(outcome))) {
		Ok(()) => true,
		Err(payload) => {
			tracing::error!(panic = %panic_message(payload), "locator.completion.panicked");
			false
		}
	}
}

#[derive(Default)]
pub(crate) struct Ledger {
	waiters: FxHashMap<ServiceKey, Vec<Waiter>>,
	next_id: u64,
}

impl Ledger {
	pub(crate) fn next_id(&mut self) -> WaiterId {
		self.next_id = self.next_id.wrapping_add(1);
		WaiterId(self.next_id)
	}

	/// Appends a waiter; settlement order per key follows request order.
	pub(crate) fn enqueue(&mut self, key: ServiceKey, waiter: Waiter) {
		self.waiters.entry(key).or_default().push(waiter);
	}

	/// Removes and returns every waiter for `key`.
	pub(crate) fn take(&mut self, key: ServiceKey) -> Vec<Waiter> {
		self.waiters.remove(&key).unwrap_or_default()
	}

	/// Removes one waiter if it is still pending.
	pub(crate) fn remove(&mut self, key: ServiceKey, id: WaiterId) -> Option<Waiter> {
		let list = self.waiters.get_mut(&key)?;
		let pos = list.iter().position(|w| w.id == id)?;
		let waiter = list.remove(pos);
		if list.is_empty() {
			self.waiters.remove(&key);
		}
		Some(waiter)
	}

	/// Removes every waiter attributed to `scope`.
	pub(crate) fn take_scope(&mut self, scope: &ScopeId) -> Vec<Waiter> {
		let mut taken = Vec::new();
		self.waiters.retain(|_, list| {
			let mut i = 0;
			while i < list.len() {
				if list[i].scope.as_ref() == Some(scope) {
					taken.push(list.remove(i));
				} else {
					i += 1;
				}
			}
			!list.is_empty()
		});
		taken
	}

	/// Removes every waiter.
	pub(crate) fn drain(&mut self) -> Vec<Waiter> {
		self.waiters.drain().flat_map(|(_, list)| list).collect()
	}

	pub(crate) fn pending(&self, key: ServiceKey) -> usize {
		self.waiters.get(&key).map_or(0, Vec::len)
	}

	pub(crate) fn len(&self) -> usize {
		self.waiters.values().map(Vec::len).sum()
	}
}

#[cfg(test)]
mod tests;
