use std::sync::Arc;

use crate::host::Release;
use crate::key::{ScopeId, ServiceKey, downcast};
use crate::locator::{Entry, Locator, ReleaseFn, release_thunk};

/// Pending registration returned by [`Locator::provide`].
///
/// Nothing is registered until [`Registration::commit`].
#[must_use = "a registration does nothing until committed"]
pub struct Registration<'a, T> {
	locator: &'a Locator,
	instance: Arc<T>,
	scope: Option<ScopeId>,
	release: Option<ReleaseFn>,
}

impl<'a, T: Send + Sync + 'static> Registration<'a, T> {
	pub(crate) fn new(locator: &'a Locator, instance: Arc<T>) -> Self {
		Self {
			locator,
			instance,
			scope: None,
			release: None,
		}
	}

	/// Tags the service with `scope` for [`Locator::unregister_scope`].
	pub fn in_scope(mut self, scope: impl Into<ScopeId>) -> Self {
		self.scope = Some(scope.into());
		self
	}

	/// Registers the service, returning the instance it replaced.
	pub fn commit(self) -> Option<Arc<T>> {
		let entry = Entry {
			service: self.instance,
			scope: self.scope,
			release: self.release,
		};
		let replaced = self.locator.insert(ServiceKey::of::<T>(), entry)?;
		downcast::<T>(replaced).ok()
	}
}

impl<T: Release> Registration<'_, T> {
	/// Invokes [`Release::release`] when the locator drops this service
	/// during cleanup or a scope unload.
	pub fn releasable(mut self) -> Self {
		self.release = Some(release_thunk::<T>);
		self
	}
}
