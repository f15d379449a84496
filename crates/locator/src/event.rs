use crate::key::{ScopeId, ServiceKey};

/// Change notification broadcast after each registry mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RegistryEvent {
	/// A service was registered or replaced.
	Registered {
		key: ServiceKey,
		scope: Option<ScopeId>,
		replaced: bool,
		/// Pending requests resolved by this registration.
		resolved: usize,
	},
	Unregistered {
		key: ServiceKey,
	},
	/// A producer rejected every pending request for `key`.
	Rejected {
		key: ServiceKey,
		waiters: usize,
	},
	/// Global cleanup dropped every service and pending request.
	Cleared {
		released: usize,
		cancelled: usize,
	},
	ScopeUnloaded {
		scope: ScopeId,
		removed: Vec<ServiceKey>,
		disposed: usize,
	},
}

impl RegistryEvent {
	/// Returns the service key this event is about, if it concerns a single one.
	pub fn key(&self) -> Option<ServiceKey> {
		match self {
			Self::Registered { key, .. } | Self::Unregistered { key } | Self::Rejected { key, .. } => Some(*key),
			Self::Cleared { .. } | Self::ScopeUnloaded { .. } => None,
		}
	}
}
