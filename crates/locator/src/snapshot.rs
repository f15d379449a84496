use std::sync::Arc;

use crate::key::{ScopeId, Service, ServiceKey, downcast};

/// One registered service as captured by [`crate::Locator::get_all`].
#[derive(Debug, Clone)]
pub struct ServiceRecord {
	pub key: ServiceKey,
	pub service: Service,
	/// Scope the service was registered within, if any.
	pub scope: Option<ScopeId>,
}

impl ServiceRecord {
	pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
		downcast::<T>(Arc::clone(&self.service)).ok()
	}
}

/// Immutable point-in-time copy of the registry, sorted by type name.
///
/// Safe to iterate while other threads keep mutating the locator.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
	records: Arc<[ServiceRecord]>,
}

impl Snapshot {
	pub(crate) fn new(mut records: Vec<ServiceRecord>) -> Self {
		records.sort_by(|a, b| a.key.name().cmp(b.key.name()));
		Self { records: records.into() }
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	pub fn iter(&self) -> std::slice::Iter<'_, ServiceRecord> {
		self.records.iter()
	}

	pub fn keys(&self) -> impl Iterator<Item = ServiceKey> + '_ {
		self.records.iter().map(|record| record.key)
	}

	/// Typed lookup within the snapshot.
	pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
		let key = ServiceKey::of::<T>();
		self.records.iter().find(|record| record.key == key)?.downcast::<T>()
	}
}

impl<'a> IntoIterator for &'a Snapshot {
	type Item = &'a ServiceRecord;
	type IntoIter = std::slice::Iter<'a, ServiceRecord>;

	fn into_iter(self) -> Self::IntoIter {
		self.iter()
	}
}
