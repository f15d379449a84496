//! Registry and waiter ledger behind one lock.
//!
//! Entries and pending waiters live in a single [`State`] guarded by one
//! mutex, so a lookup that misses and a concurrent registration for the same
//! key can never miss each other: either the lookup observes the instance, or
//! its waiter is already queued when the registration drains the ledger.
//! Completion handles are always invoked after the guard is dropped.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::LocatorConfig;
use crate::error::{LocatorError, RejectReason, panic_message};
use crate::event::RegistryEvent;
use crate::host::{AlwaysAlive, LifecycleSource, Liveness, Release};
use crate::key::{ScopeId, Service, ServiceKey, downcast, same_instance};
use crate::ledger::{Completion, Ledger, Waiter, WaiterId, complete_contained};
use crate::lifecycle::Lifecycle;
use crate::registration::Registration;
use crate::snapshot::{ServiceRecord, Snapshot};
use crate::spawn::spawn_detached;

/// Type-erased release contract captured at registration time.
pub(crate) type ReleaseFn = fn(&(dyn Any + Send + Sync));

pub(crate) fn release_thunk<T: Release>(instance: &(dyn Any + Send + Sync)) {
	if let Some(service) = instance.downcast_ref::<T>() {
		service.release();
	}
}

pub(crate) struct Entry {
	pub(crate) service: Service,
	pub(crate) scope: Option<ScopeId>,
	pub(crate) release: Option<ReleaseFn>,
}

#[derive(Default)]
struct State {
	entries: FxHashMap<ServiceKey, Entry>,
	ledger: Ledger,
}

pub(crate) struct Shared {
	state: Mutex<State>,
	events: broadcast::Sender<RegistryEvent>,
	liveness: Arc<dyn Liveness>,
	lifecycle: Lifecycle,
	config: LocatorConfig,
}

/// Per-request knobs shared by every retrieval adapter.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
	pub(crate) cancel: Option<CancellationToken>,
	pub(crate) scope: Option<ScopeId>,
}

impl RequestOptions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Withdraws the request as `Cancelled` once `token` fires.
	#[must_use]
	pub fn cancel_on(mut self, token: CancellationToken) -> Self {
		self.cancel = Some(token);
		self
	}

	/// Attributes the request to `scope`; unloading the scope disposes it.
	#[must_use]
	pub fn in_scope(mut self, scope: impl Into<ScopeId>) -> Self {
		self.scope = Some(scope.into());
		self
	}

	fn is_cancelled(&self) -> bool {
		self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
	}
}

impl From<CancellationToken> for RequestOptions {
	fn from(token: CancellationToken) -> Self {
		Self::new().cancel_on(token)
	}
}

impl From<&CancellationToken> for RequestOptions {
	fn from(token: &CancellationToken) -> Self {
		Self::new().cancel_on(token.clone())
	}
}

/// Handle to a queued waiter, used to withdraw it when its consumer goes away.
pub(crate) struct Ticket {
	shared: Weak<Shared>,
	key: ServiceKey,
	id: WaiterId,
}

impl Ticket {
	/// Removes the waiter without settling it. Returns `false` if it already left the ledger.
	pub(crate) fn withdraw(&self) -> bool {
		let Some(shared) = self.shared.upgrade() else {
			return false;
		};
		let waiter = shared.state.lock().ledger.remove(self.key, self.id);
		match waiter {
			Some(waiter) => {
				tracing::trace!(service = self.key.name(), waiter = self.id.0, "locator.withdraw");
				waiter.discard();
				true
			}
			None => false,
		}
	}
}

/// Typed, lifecycle-aware service registry.
///
/// Cloning is cheap; all clones share the same registry and ledger.
#[derive(Clone)]
pub struct Locator {
	shared: Arc<Shared>,
}

impl Default for Locator {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for Locator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.shared.state.lock();
		f.debug_struct("Locator")
			.field("services", &state.entries.len())
			.field("pending", &state.ledger.len())
			.field("lifecycle", &self.shared.lifecycle.state())
			.finish()
	}
}

impl Locator {
	/// Creates a locator with default configuration and no host hooks.
	pub fn new() -> Self {
		LocatorBuilder::new().build()
	}

	pub fn builder() -> LocatorBuilder {
		LocatorBuilder::new()
	}

	pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
		Self { shared }
	}

	pub(crate) fn downgrade(&self) -> Weak<Shared> {
		Arc::downgrade(&self.shared)
	}

	pub(crate) fn shared_lifecycle(&self) -> &Lifecycle {
		&self.shared.lifecycle
	}

	pub fn config(&self) -> &LocatorConfig {
		&self.shared.config
	}

	/// Subscribes to change notifications.
	pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
		self.shared.events.subscribe()
	}

	fn emit(&self, event: RegistryEvent) {
		// No receivers is not an error.
		let _ = self.shared.events.send(event);
	}

	/// Registers `instance` as the service for `T`, replacing any previous one.
	///
	/// Pending requests for `T` resolve with `instance`. Returns the replaced
	/// instance, if any.
	///
	/// The instance is never released by [`cleanup`](Self::cleanup) or a scope
	/// unload, even when `T` implements [`Release`]. Use
	/// `provide(instance).releasable().commit()` to attach the release contract.
	pub fn register<T: Send + Sync + 'static>(&self, instance: T) -> Option<Arc<T>> {
		self.provide(instance).commit()
	}

	/// Registers an already shared instance.
	pub fn register_arc<T: Send + Sync + 'static>(&self, instance: Arc<T>) -> Option<Arc<T>> {
		self.provide_arc(instance).commit()
	}

	/// Registers a possibly absent instance, failing with
	/// [`LocatorError::NullArgument`] when there is none.
	pub fn register_opt<T: Send + Sync + 'static>(&self, instance: Option<Arc<T>>) -> crate::Result<Option<Arc<T>>> {
		match instance {
			Some(instance) => Ok(self.register_arc(instance)),
			None => {
				let service = ServiceKey::of::<T>();
				tracing::warn!(service = service.name(), "locator.register.null");
				Err(LocatorError::NullArgument { service })
			}
		}
	}

	/// Starts a registration that can be scoped or carry a release contract.
	pub fn provide<T: Send + Sync + 'static>(&self, instance: T) -> Registration<'_, T> {
		Registration::new(self, Arc::new(instance))
	}

	pub fn provide_arc<T: Send + Sync + 'static>(&self, instance: Arc<T>) -> Registration<'_, T> {
		Registration::new(self, instance)
	}

	pub(crate) fn insert(&self, key: ServiceKey, entry: Entry) -> Option<Service> {
		let service = Arc::clone(&entry.service);
		let scope = entry.scope.clone();
		let (replaced, waiters) = {
			let mut state = self.shared.state.lock();
			let replaced = state.entries.insert(key, entry);
			(replaced, state.ledger.take(key))
		};

		let resolved = waiters.len();
		tracing::debug!(service = key.name(), waiters = resolved, replaced = replaced.is_some(), "locator.register");
		for waiter in waiters {
			waiter.settle(Ok(Arc::clone(&service)));
		}

		let replaced = replaced.map(|entry| entry.service);
		self.emit(RegistryEvent::Registered {
			key,
			scope,
			replaced: replaced.is_some(),
			resolved,
		});
		replaced
	}

	/// Removes the service for `T`. Pending requests are unaffected.
	pub fn unregister<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
		let key = ServiceKey::of::<T>();
		let removed = self.shared.state.lock().entries.remove(&key)?;
		tracing::debug!(service = key.name(), "locator.unregister");
		self.emit(RegistryEvent::Unregistered { key });
		downcast::<T>(removed.service).ok()
	}

	/// Non-blocking lookup.
	pub fn try_get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
		let service = self.lookup(ServiceKey::of::<T>())?;
		downcast::<T>(service).ok()
	}

	/// Lookup that reports absence as [`LocatorError::NotFound`].
	pub fn require<T: Send + Sync + 'static>(&self) -> crate::Result<Arc<T>> {
		let key = ServiceKey::of::<T>();
		let service = self.lookup(key).ok_or(LocatorError::NotFound { service: key })?;
		downcast::<T>(service)
	}

	pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
		self.shared.state.lock().entries.contains_key(&ServiceKey::of::<T>())
	}

	fn lookup(&self, key: ServiceKey) -> Option<Service> {
		self.shared.state.lock().entries.get(&key).map(|entry| Arc::clone(&entry.service))
	}

	/// Immutable copy of every registered service, sorted by type name.
	pub fn get_all(&self) -> Snapshot {
		let records: Vec<_> = {
			let state = self.shared.state.lock();
			state
				.entries
				.iter()
				.map(|(key, entry)| ServiceRecord {
					key: *key,
					service: Arc::clone(&entry.service),
					scope: entry.scope.clone(),
				})
				.collect()
		};
		Snapshot::new(records)
	}

	/// Returns `true` when `instance` is the currently registered service for
	/// `T` and the host's aliveness predicate still accepts it.
	pub fn is_valid<T: Send + Sync + 'static>(&self, instance: Option<&Arc<T>>) -> bool {
		let Some(instance) = instance else {
			return false;
		};
		let key = ServiceKey::of::<T>();
		let Some(current) = self.lookup(key) else {
			return false;
		};
		same_instance(instance, &current) && self.shared.liveness.is_alive(key, &**instance)
	}

	/// Rejects every pending request for `T` with `reason`.
	///
	/// Used by producers that know initialization failed and no instance will
	/// arrive. Returns the number of rejected waiters.
	pub fn reject<T: Send + Sync + 'static>(&self, reason: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> usize {
		let key = ServiceKey::of::<T>();
		let reason: RejectReason = Arc::from(reason.into());
		self.reject_key(key, reason)
	}

	pub(crate) fn reject_key(&self, key: ServiceKey, reason: RejectReason) -> usize {
		let waiters = self.shared.state.lock().ledger.take(key);
		let count = waiters.len();
		tracing::warn!(service = key.name(), waiters = count, %reason, "locator.reject");
		let error = LocatorError::Rejected { service: key, reason };
		for waiter in waiters {
			waiter.settle(Err(error.clone()));
		}
		self.emit(RegistryEvent::Rejected { key, waiters: count });
		count
	}

	/// Number of pending requests for `T`.
	pub fn pending<T: 'static>(&self) -> usize {
		self.shared.state.lock().ledger.pending(ServiceKey::of::<T>())
	}

	/// Number of pending requests across all types.
	pub fn pending_total(&self) -> usize {
		self.shared.state.lock().ledger.len()
	}

	/// Drops every service and pending request.
	///
	/// Release contracts run for every entry that carries one; pending
	/// requests settle as [`LocatorError::Cancelled`].
	pub fn cleanup(&self) {
		let (entries, waiters) = {
			let mut state = self.shared.state.lock();
			(std::mem::take(&mut state.entries), state.ledger.drain())
		};

		let mut released = 0;
		for (key, entry) in &entries {
			if release_entry(*key, entry) {
				released += 1;
			}
		}
		drop(entries);

		let cancelled = waiters.len();
		for waiter in waiters {
			waiter.settle(Err(LocatorError::Cancelled));
		}

		tracing::debug!(released, cancelled, "locator.cleanup");
		self.emit(RegistryEvent::Cleared { released, cancelled });
	}

	/// Unloads every service registered within `scope` and disposes the
	/// pending requests attributed to it. Returns the number of services removed.
	pub fn unregister_scope(&self, scope: &ScopeId) -> usize {
		let (removed, waiters) = {
			let mut state = self.shared.state.lock();
			let keys: Vec<ServiceKey> = state
				.entries
				.iter()
				.filter(|(_, entry)| entry.scope.as_ref() == Some(scope))
				.map(|(key, _)| *key)
				.collect();
			let removed: Vec<(ServiceKey, Entry)> = keys.into_iter().filter_map(|key| state.entries.remove(&key).map(|entry| (key, entry))).collect();
			(removed, state.ledger.take_scope(scope))
		};

		if self.shared.config.release_on_scope_unload {
			for (key, entry) in &removed {
				release_entry(*key, entry);
			}
		}

		let disposed = waiters.len();
		for waiter in waiters {
			waiter.settle(Err(LocatorError::Disposed { scope: scope.clone() }));
		}

		let keys: Vec<ServiceKey> = removed.iter().map(|(key, _)| *key).collect();
		drop(removed);
		tracing::debug!(%scope, removed = keys.len(), disposed, "locator.unregister_scope");
		let count = keys.len();
		self.emit(RegistryEvent::ScopeUnloaded {
			scope: scope.clone(),
			removed: keys,
			disposed,
		});
		count
	}

	/// Looks up `key` or queues `complete` until it is registered.
	///
	/// `complete` is invoked exactly once: immediately (outside the lock) when
	/// the service is present or the request is already cancelled, otherwise
	/// by whichever path later removes the waiter from the ledger. Returns a
	/// ticket when the request was queued.
	pub(crate) fn admit(&self, key: ServiceKey, options: &RequestOptions, complete: Completion) -> Option<Ticket> {
		enum Admission {
			Found(Service, Completion),
			Cancelled(Completion),
			Queued(WaiterId, CancellationToken),
		}

		let admission = {
			let mut state = self.shared.state.lock();
			if let Some(entry) = state.entries.get(&key) {
				Admission::Found(Arc::clone(&entry.service), complete)
			} else if options.is_cancelled() {
				Admission::Cancelled(complete)
			} else {
				let id = state.ledger.next_id();
				let waiter = Waiter::new(id, options.scope.clone(), complete);
				let settled = waiter.settled.clone();
				state.ledger.enqueue(key, waiter);
				Admission::Queued(id, settled)
			}
		};

		match admission {
			Admission::Found(service, complete) => {
				tracing::trace!(service = key.name(), "locator.admit.found");
				complete_contained(complete, Ok(service));
				None
			}
			Admission::Cancelled(complete) => {
				tracing::trace!(service = key.name(), "locator.admit.cancelled");
				complete_contained(complete, Err(LocatorError::Cancelled));
				None
			}
			Admission::Queued(id, settled) => {
				tracing::trace!(service = key.name(), waiter = id.0, "locator.admit.queued");
				if let Some(token) = options.cancel.clone() {
					if !self.watch_cancellation(key, id, token, settled) {
						tracing::warn!(service = key.name(), waiter = id.0, "locator.cancel_watch.unavailable");
					}
				}
				Some(Ticket {
					shared: self.downgrade(),
					key,
					id,
				})
			}
		}
	}

	/// Cancels one waiter if it is still pending. A waiter already settled by
	/// a racing registration is left alone.
	pub(crate) fn cancel_waiter(&self, key: ServiceKey, id: WaiterId) -> bool {
		let waiter = self.shared.state.lock().ledger.remove(key, id);
		let Some(waiter) = waiter else {
			return false;
		};
		tracing::trace!(service = key.name(), waiter = id.0, "locator.cancel");
		waiter.settle(Err(LocatorError::Cancelled));
		true
	}

	/// Returns `false` when no runtime could host the watcher; the waiter then
	/// only settles through registration, rejection or withdrawal.
	fn watch_cancellation(&self, key: ServiceKey, id: WaiterId, token: CancellationToken, settled: CancellationToken) -> bool {
		let shared = self.downgrade();
		spawn_detached("cancel-watch", async move {
			tokio::select! {
				biased;
				() = settled.cancelled() => {}
				() = token.cancelled() => {
					if let Some(shared) = shared.upgrade() {
						Locator::from_shared(shared).cancel_waiter(key, id);
					}
				}
			}
		})
	}
}

/// Invokes an entry's release contract, containing panics. Returns `true`
/// when a contract was present.
fn release_entry(key: ServiceKey, entry: &Entry) -> bool {
	let Some(release) = entry.release else {
		return false;
	};
	if let Err(payload) = catch_unwind(AssertUnwindSafe(|| release(&*entry.service))) {
		tracing::error!(service = key.name(), panic = %panic_message(payload), "locator.release.panicked");
	}
	true
}

/// Builder for a [`Locator`] with host collaborators attached.
pub struct LocatorBuilder {
	config: LocatorConfig,
	liveness: Arc<dyn Liveness>,
	sources: Vec<Arc<dyn LifecycleSource>>,
}

impl Default for LocatorBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl LocatorBuilder {
	pub fn new() -> Self {
		Self {
			config: LocatorConfig::default(),
			liveness: Arc::new(AlwaysAlive),
			sources: Vec::new(),
		}
	}

	#[must_use]
	pub fn config(mut self, config: LocatorConfig) -> Self {
		self.config = config;
		self
	}

	/// Sets the aliveness predicate consulted by [`Locator::is_valid`].
	#[must_use]
	pub fn liveness(mut self, liveness: impl Liveness) -> Self {
		self.liveness = Arc::new(liveness);
		self
	}

	/// Adds a host hook source subscribed on [`Locator::initialize`].
	#[must_use]
	pub fn lifecycle_source(mut self, source: impl LifecycleSource) -> Self {
		self.sources.push(Arc::new(source));
		self
	}

	#[must_use]
	pub fn lifecycle_source_arc(mut self, source: Arc<dyn LifecycleSource>) -> Self {
		self.sources.push(source);
		self
	}

	pub fn build(self) -> Locator {
		let (events, _) = broadcast::channel(self.config.event_buffer.max(1));
		let initialize = self.config.initialize_on_build;
		let locator = Locator {
			shared: Arc::new(Shared {
				state: Mutex::new(State::default()),
				events,
				liveness: self.liveness,
				lifecycle: Lifecycle::new(self.sources),
				config: self.config,
			}),
		};
		if initialize {
			locator.initialize();
		}
		locator
	}
}
