use std::sync::Arc;

use parking_lot::Mutex;

use crate::host::{HostEventSink, LifecycleSource, Subscription};
use crate::locator::Locator;

/// Lifecycle state of a [`Locator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
	Uninitialized,
	Initialized,
}

struct LifecycleInner {
	state: LifecycleState,
	subscriptions: Vec<Subscription>,
}

/// Init/deinit state plus the host hook subscriptions held while initialized.
pub(crate) struct Lifecycle {
	inner: Mutex<LifecycleInner>,
	sources: Vec<Arc<dyn LifecycleSource>>,
}

impl Lifecycle {
	pub(crate) fn new(sources: Vec<Arc<dyn LifecycleSource>>) -> Self {
		Self {
			inner: Mutex::new(LifecycleInner {
				state: LifecycleState::Uninitialized,
				subscriptions: Vec::new(),
			}),
			sources,
		}
	}

	pub(crate) fn state(&self) -> LifecycleState {
		self.inner.lock().state
	}

	/// Flips to `Initialized`. Returns `false` if already there.
	fn enter(&self) -> bool {
		let mut inner = self.inner.lock();
		if inner.state == LifecycleState::Initialized {
			return false;
		}
		inner.state = LifecycleState::Initialized;
		true
	}

	/// Stores fresh subscriptions, or hands them back for dropping when a
	/// concurrent deinitialize won the race.
	fn attach(&self, subscriptions: Vec<Subscription>) -> Vec<Subscription> {
		let mut inner = self.inner.lock();
		if inner.state == LifecycleState::Initialized {
			inner.subscriptions.extend(subscriptions);
			Vec::new()
		} else {
			subscriptions
		}
	}

	/// Flips to `Uninitialized` and returns the subscriptions to drop.
	fn leave(&self) -> Option<Vec<Subscription>> {
		let mut inner = self.inner.lock();
		if inner.state == LifecycleState::Uninitialized {
			return None;
		}
		inner.state = LifecycleState::Uninitialized;
		Some(std::mem::take(&mut inner.subscriptions))
	}
}

impl Locator {
	pub fn state(&self) -> LifecycleState {
		self.shared_lifecycle().state()
	}

	/// Enters the initialized state and subscribes host hook sources.
	///
	/// Idempotent: returns `false` when already initialized.
	pub fn initialize(&self) -> bool {
		let lifecycle = self.shared_lifecycle();
		if !lifecycle.enter() {
			return false;
		}

		// Hooks may deliver synchronously from `subscribe`, so no lock is held here.
		let sink = HostEventSink::new(self.downgrade());
		let subscriptions: Vec<Subscription> = lifecycle.sources.iter().map(|source| source.subscribe(sink.clone())).collect();
		let hooks = subscriptions.len();
		let stale = lifecycle.attach(subscriptions);
		drop(stale);

		tracing::debug!(hooks, "locator.initialize");
		true
	}

	/// Unsubscribes host hooks and runs [`Locator::cleanup`].
	///
	/// Idempotent: returns `false` when already uninitialized.
	pub fn deinitialize(&self) -> bool {
		let Some(subscriptions) = self.shared_lifecycle().leave() else {
			return false;
		};
		let hooks = subscriptions.len();
		drop(subscriptions);
		tracing::debug!(hooks, "locator.deinitialize");
		self.cleanup();
		true
	}
}
