//! Typed, lifecycle-aware service locator.
//!
//! Producers publish one instance per type with [`Locator::register`].
//! Consumers retrieve it through the idiom that fits their call site:
//!
//! - [`Locator::try_get`]: non-blocking lookup.
//! - [`Locator::get_async`]: a [`ServiceFuture`] that waits for registration.
//! - [`Locator::get_promise`]: a chainable [`ServicePromise`].
//! - [`Locator::get_stepwise`]: a caller-driven [`Stepwise`] poll sequence.
//! - [`Locator::join_async`] / [`Locator::join_promise`]: 2 to 6 services at once.
//!
//! Requests made before a service exists wait in a per-type ledger that
//! shares one lock with the registry. Registration, [`Locator::reject`],
//! cancellation, [`Locator::cleanup`] and [`Locator::unregister_scope`]
//! settle each waiter exactly once, always outside the lock.

mod config;
mod error;
mod event;
mod future;
mod host;
mod join;
mod key;
mod ledger;
mod lifecycle;
mod locator;
mod promise;
mod registration;
mod snapshot;
mod spawn;
mod stepwise;

pub use config::{ConfigError, LocatorConfig};
pub use error::{LocatorError, RejectReason};
pub use event::RegistryEvent;
pub use future::ServiceFuture;
pub use host::{AlwaysAlive, HostEvent, HostEventSink, LifecycleSource, Liveness, Release, Subscription};
pub use join::{JoinFuture, ServiceSet};
pub use key::{ScopeId, Service, ServiceKey};
pub use lifecycle::LifecycleState;
pub use locator::{Locator, LocatorBuilder, RequestOptions};
pub use promise::ServicePromise;
pub use registration::Registration;
pub use snapshot::{ServiceRecord, Snapshot};
pub use stepwise::{Step, Stepwise};
pub use tokio_util::sync::CancellationToken;

pub type Result<T, E = LocatorError> = std::result::Result<T, E>;
