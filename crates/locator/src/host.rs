//! Contracts the locator consumes from its host environment.
//!
//! None of these are implemented by the locator itself: hosts supply an
//! aliveness predicate, optional lifecycle hook sources, and services may opt
//! into a release contract.

use std::any::Any;
use std::fmt;
use std::sync::Weak;

use crate::key::{ScopeId, ServiceKey};
use crate::locator::{Locator, Shared};

/// Release contract invoked when the locator drops a service during cleanup.
pub trait Release: Send + Sync + 'static {
	fn release(&self);
}

/// Aliveness predicate for hosts where a handle can outlive its resource.
pub trait Liveness: Send + Sync + 'static {
	/// Returns whether the resource backing `instance` is still alive.
	fn is_alive(&self, key: ServiceKey, instance: &(dyn Any + Send + Sync)) -> bool;
}

/// Default predicate: every instance is alive.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAlive;

impl Liveness for AlwaysAlive {
	fn is_alive(&self, _key: ServiceKey, _instance: &(dyn Any + Send + Sync)) -> bool {
		true
	}
}

impl<F> Liveness for F
where
	F: Fn(ServiceKey, &(dyn Any + Send + Sync)) -> bool + Send + Sync + 'static,
{
	fn is_alive(&self, key: ServiceKey, instance: &(dyn Any + Send + Sync)) -> bool {
		self(key, instance)
	}
}

/// Lifecycle trigger delivered by a host hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
	/// Host is shutting down; deinitialize the locator.
	Shutdown,
	/// Drop every service and pending request, keep the locator initialized.
	Reset,
	/// A host-defined scope ended; unload the services tagged with it.
	ScopeEnded(ScopeId),
}

/// Supplier of host lifecycle triggers.
///
/// The locator subscribes on [`Locator::initialize`] and drops the returned
/// [`Subscription`] on [`Locator::deinitialize`].
pub trait LifecycleSource: Send + Sync + 'static {
	fn subscribe(&self, sink: HostEventSink) -> Subscription;
}

/// Handle through which a host delivers [`HostEvent`]s.
///
/// Holds a weak reference; delivering after the locator is gone does nothing.
#[derive(Clone)]
pub struct HostEventSink {
	shared: Weak<Shared>,
}

impl HostEventSink {
	pub(crate) fn new(shared: Weak<Shared>) -> Self {
		Self { shared }
	}

	/// Applies `event` to the locator. Returns `false` if the locator is gone.
	pub fn deliver(&self, event: HostEvent) -> bool {
		let Some(shared) = self.shared.upgrade() else {
			tracing::trace!(?event, "locator.host_event.orphaned");
			return false;
		};
		let locator = Locator::from_shared(shared);
		tracing::debug!(?event, "locator.host_event");
		match event {
			HostEvent::Shutdown => {
				locator.deinitialize();
			}
			HostEvent::Reset => locator.cleanup(),
			HostEvent::ScopeEnded(scope) => {
				locator.unregister_scope(&scope);
			}
		}
		true
	}
}

impl fmt::Debug for HostEventSink {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HostEventSink").field("attached", &(self.shared.strong_count() > 0)).finish()
	}
}

/// Active hook subscription; unsubscribes when dropped.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
	unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
	pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
		Self {
			unsubscribe: Some(Box::new(unsubscribe)),
		}
	}

	/// Subscription with nothing to undo.
	pub fn noop() -> Self {
		Self { unsubscribe: None }
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(unsubscribe) = self.unsubscribe.take() {
			unsubscribe();
		}
	}
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription").field("active", &self.unsubscribe.is_some()).finish()
	}
}
