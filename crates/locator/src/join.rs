//! K-ary join of independent service requests.
//!
//! [`JoinCore`] is the one join primitive; the future and promise adapters
//! only differ in how they consume its final outcome. The aggregate resolves
//! with every branch value in branch order, or rejects with the first branch
//! failure. Exactly-once settlement is decided by a compare-and-set on the
//! `decided` flag. A failing branch withdraws every sibling still waiting in
//! the ledger through its ticket, and cancels the shared link token.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::LocatorError;
use crate::key::{Service, ServiceKey, downcast};
use crate::ledger::Settlement;
use crate::locator::{Locator, RequestOptions, Ticket};
use crate::promise::ServicePromise;

type JoinOutcome = Result<Vec<Service>, LocatorError>;
type JoinFinish = Box<dyn FnOnce(JoinOutcome) + Send>;

/// A tuple of 2 to 6 service types requested together.
pub trait ServiceSet: 'static {
	/// Tuple of typed handles, in branch order.
	type Output: Clone + Send + 'static;

	fn keys() -> Vec<ServiceKey>;

	/// Converts resolved branch values (in branch order) into [`Self::Output`].
	fn assemble(services: Vec<Service>) -> crate::Result<Self::Output>;
}

macro_rules! impl_service_set {
	($($name:ident),+) => {
		impl<$($name: Send + Sync + 'static),+> ServiceSet for ($($name,)+) {
			type Output = ($(Arc<$name>,)+);

			fn keys() -> Vec<ServiceKey> {
				vec![$(ServiceKey::of::<$name>()),+]
			}

			fn assemble(services: Vec<Service>) -> crate::Result<Self::Output> {
				let mut services = services.into_iter();
				Ok(($(
					downcast::<$name>(services.next().ok_or(LocatorError::TypeMismatch {
						service: ServiceKey::of::<$name>(),
					})?)?,
				)+))
			}
		}
	};
}

impl_service_set!(A, B);
impl_service_set!(A, B, C);
impl_service_set!(A, B, C, D);
impl_service_set!(A, B, C, D, E);
impl_service_set!(A, B, C, D, E, F);

struct JoinSlots {
	values: Vec<Option<Service>>,
	filled: usize,
}

/// Request options shared by every branch. Branches watch the link token only
/// when the caller supplied one; otherwise sibling withdrawal on failure or
/// abandonment goes through the tickets and needs no watcher task.
fn branch_options(options: &RequestOptions, link: &CancellationToken) -> RequestOptions {
	RequestOptions {
		cancel: options.cancel.as_ref().map(|_| link.clone()),
		scope: options.scope.clone(),
	}
}

pub(crate) struct JoinCore {
	slots: Mutex<JoinSlots>,
	decided: AtomicBool,
	link: CancellationToken,
	/// Branches currently queued in the ledger.
	tickets: Mutex<Vec<Ticket>>,
	finish: Mutex<Option<JoinFinish>>,
}

impl JoinCore {
	/// Admits one ledger request per key and wires their completions into a
	/// single aggregate outcome delivered to `finish`.
	pub(crate) fn start(locator: &Locator, keys: Vec<ServiceKey>, options: &RequestOptions, finish: JoinFinish) -> Arc<Self> {
		// Child of the caller's token: caller cancellation fans out to every
		// branch, a branch failure does not cancel the caller's token.
		let link = options.cancel.as_ref().map_or_else(CancellationToken::new, CancellationToken::child_token);
		let core = Arc::new(Self {
			slots: Mutex::new(JoinSlots {
				values: vec![None; keys.len()],
				filled: 0,
			}),
			decided: AtomicBool::new(false),
			link: link.clone(),
			tickets: Mutex::new(Vec::new()),
			finish: Mutex::new(Some(finish)),
		});
		tracing::trace!(branches = keys.len(), "locator.join.start");

		let shared = branch_options(options, &link);
		for (index, key) in keys.into_iter().enumerate() {
			if core.decided.load(Ordering::Acquire) {
				break;
			}
			let branch = Arc::clone(&core);
			if let Some(ticket) = locator.admit(key, &shared, Box::new(move |settlement| branch.settle_branch(index, settlement))) {
				core.tickets.lock().push(ticket);
			}
		}
		// A branch may have failed while later ones were still being queued.
		if core.decided.load(Ordering::Acquire) {
			core.withdraw_branches();
		}
		core
	}

	/// Settles the aggregate as cancelled when its consumer goes away.
	pub(crate) fn abandon(&self) {
		if self.decide() {
			tracing::trace!("locator.join.abandoned");
			self.link.cancel();
			self.withdraw_branches();
			self.finish(Err(LocatorError::Cancelled));
		}
	}

	/// Synchronously removes every branch still queued in the ledger.
	fn withdraw_branches(&self) {
		let tickets = std::mem::take(&mut *self.tickets.lock());
		for ticket in tickets {
			ticket.withdraw();
		}
	}

	fn settle_branch(&self, index: usize, settlement: Settlement) {
		if self.decided.load(Ordering::Acquire) {
			// Sibling cancellations triggered by an earlier failure land here.
			return;
		}
		match settlement {
			Ok(service) => {
				let values = {
					let mut slots = self.slots.lock();
					if slots.values[index].is_none() {
						slots.values[index] = Some(service);
						slots.filled += 1;
					}
					let complete = slots.filled == slots.values.len();
					if complete && self.decide() {
						Some(slots.values.iter_mut().filter_map(Option::take).collect::<Vec<_>>())
					} else {
						None
					}
				};
				if let Some(values) = values {
					tracing::trace!(branches = values.len(), "locator.join.resolved");
					self.finish(Ok(values));
				}
			}
			Err(error) => {
				if self.decide() {
					tracing::debug!(branch = index, %error, "locator.join.rejected");
					self.link.cancel();
					self.withdraw_branches();
					self.finish(Err(error));
				}
			}
		}
	}

	fn decide(&self) -> bool {
		self.decided.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
	}

	fn finish(&self, outcome: JoinOutcome) {
		let finish = self.finish.lock().take();
		if let Some(finish) = finish {
			finish(outcome);
		}
	}
}

/// Future resolving to a tuple of services, see [`Locator::join_async`].
///
/// Dropping it while pending cancels every outstanding branch.
#[must_use = "futures do nothing unless awaited"]
pub struct JoinFuture<S: ServiceSet> {
	rx: Option<oneshot::Receiver<JoinOutcome>>,
	core: Arc<JoinCore>,
	_marker: PhantomData<fn() -> S>,
}

impl<S: ServiceSet> Future for JoinFuture<S> {
	type Output = crate::Result<S::Output>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();
		let Some(rx) = this.rx.as_mut() else {
			return Poll::Ready(Err(LocatorError::Cancelled));
		};
		let outcome = match Pin::new(rx).poll(cx) {
			Poll::Pending => return Poll::Pending,
			Poll::Ready(Ok(outcome)) => outcome,
			Poll::Ready(Err(_)) => Err(LocatorError::Cancelled),
		};
		this.rx = None;
		Poll::Ready(outcome.and_then(S::assemble))
	}
}

impl<S: ServiceSet> Drop for JoinFuture<S> {
	fn drop(&mut self) {
		if self.rx.is_some() {
			self.core.abandon();
		}
	}
}

impl Locator {
	/// Requests every service of the tuple `S` as one future.
	///
	/// ```no_run
	/// # async fn demo(locator: waypost_locator::Locator) -> waypost_locator::Result<()> {
	/// struct Audio;
	/// struct Input;
	/// let (audio, input) = locator.join_async::<(Audio, Input)>(waypost_locator::RequestOptions::new()).await?;
	/// # let _ = (audio, input);
	/// # Ok(())
	/// # }
	/// ```
	pub fn join_async<S: ServiceSet>(&self, options: impl Into<RequestOptions>) -> JoinFuture<S> {
		let (tx, rx) = oneshot::channel();
		let core = JoinCore::start(
			self,
			S::keys(),
			&options.into(),
			Box::new(move |outcome| {
				let _ = tx.send(outcome);
			}),
		);
		JoinFuture {
			rx: Some(rx),
			core,
			_marker: PhantomData,
		}
	}

	/// Requests every service of the tuple `S` as one promise.
	pub fn join_promise<S: ServiceSet>(&self, options: impl Into<RequestOptions>) -> ServicePromise<S::Output> {
		let (promise, resolver) = ServicePromise::pending();
		JoinCore::start(
			self,
			S::keys(),
			&options.into(),
			Box::new(move |outcome| {
				resolver.settle(outcome.and_then(S::assemble));
			}),
		);
		promise
	}
}
