use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Type-erased service instance as stored by the registry.
pub type Service = Arc<dyn Any + Send + Sync>;

/// Registry key identifying a service by its concrete type.
///
/// Equality and hashing only consider the [`TypeId`]; the type name is carried
/// for logs and error messages.
#[derive(Clone, Copy)]
pub struct ServiceKey {
	id: TypeId,
	name: &'static str,
}

impl ServiceKey {
	/// Returns the key for `T`.
	pub fn of<T: ?Sized + 'static>() -> Self {
		Self {
			id: TypeId::of::<T>(),
			name: std::any::type_name::<T>(),
		}
	}

	pub fn type_id(&self) -> TypeId {
		self.id
	}

	/// Fully qualified type name of the service.
	pub fn name(&self) -> &'static str {
		self.name
	}
}

impl PartialEq for ServiceKey {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

impl fmt::Debug for ServiceKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("ServiceKey").field(&self.name).finish()
	}
}

impl fmt::Display for ServiceKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name)
	}
}

/// Externally defined lifetime boundary used to batch-unregister services.
///
/// The locator attaches no meaning to the identifier; hosts decide what a
/// scope is (a loaded level, a plugin, a session).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(Arc<str>);

impl ScopeId {
	pub fn new(id: impl Into<Arc<str>>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<&str> for ScopeId {
	fn from(id: &str) -> Self {
		Self(Arc::from(id))
	}
}

impl From<String> for ScopeId {
	fn from(id: String) -> Self {
		Self(Arc::from(id))
	}
}

impl fmt::Debug for ScopeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ScopeId({:?})", &*self.0)
	}
}

impl fmt::Display for ScopeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Downcasts a stored instance to its typed handle.
pub(crate) fn downcast<T: Send + Sync + 'static>(service: Service) -> crate::Result<Arc<T>> {
	service.downcast::<T>().map_err(|_| crate::LocatorError::TypeMismatch {
		service: ServiceKey::of::<T>(),
	})
}

/// Returns `true` when both handles point at the same allocation.
pub(crate) fn same_instance<T: Send + Sync + 'static>(typed: &Arc<T>, service: &Service) -> bool {
	std::ptr::addr_eq(Arc::as_ptr(typed), Arc::as_ptr(service))
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Alpha;
	struct Beta;

	#[test]
	fn keys_compare_by_type() {
		assert_eq!(ServiceKey::of::<Alpha>(), ServiceKey::of::<Alpha>());
		assert_ne!(ServiceKey::of::<Alpha>(), ServiceKey::of::<Beta>());
		assert!(ServiceKey::of::<Alpha>().name().ends_with("Alpha"));
	}

	#[test]
	fn scope_ids_from_strings() {
		let a = ScopeId::from("level-1");
		let b = ScopeId::from(String::from("level-1"));
		assert_eq!(a, b);
		assert_eq!(a.to_string(), "level-1");
	}

	#[test]
	fn same_instance_tracks_allocation() {
		let typed = Arc::new(7_u32);
		let erased: Service = typed.clone();
		assert!(same_instance(&typed, &erased));
		assert!(!same_instance(&Arc::new(7_u32), &erased));
	}
}
