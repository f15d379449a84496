//! Future adapter: single-resolution async retrieval.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::LocatorError;
use crate::key::{ServiceKey, downcast};
use crate::ledger::Settlement;
use crate::locator::{Locator, RequestOptions, Ticket};

/// Future resolving to the service for `T`.
///
/// Completes with the registered instance, or with `Cancelled`, `Rejected`
/// or `Disposed`. Dropping a pending future withdraws its request from the
/// ledger.
#[must_use = "futures do nothing unless awaited"]
pub struct ServiceFuture<T> {
	rx: Option<oneshot::Receiver<Settlement>>,
	ticket: Option<Ticket>,
	_marker: PhantomData<fn() -> T>,
}

impl<T> ServiceFuture<T> {
	/// Returns `true` once the future has yielded its output.
	pub fn is_terminated(&self) -> bool {
		self.rx.is_none()
	}
}

impl<T: Send + Sync + 'static> Future for ServiceFuture<T> {
	type Output = crate::Result<Arc<T>>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.get_mut();
		let Some(rx) = this.rx.as_mut() else {
			return Poll::Ready(Err(LocatorError::Cancelled));
		};
		let settlement = match Pin::new(rx).poll(cx) {
			Poll::Pending => return Poll::Pending,
			Poll::Ready(Ok(settlement)) => settlement,
			// Completion handle dropped unsettled: the locator itself went away.
			Poll::Ready(Err(_)) => Err(LocatorError::Cancelled),
		};
		this.rx = None;
		this.ticket = None;
		Poll::Ready(settlement.and_then(downcast::<T>))
	}
}

impl<T> Drop for ServiceFuture<T> {
	fn drop(&mut self) {
		if let Some(ticket) = self.ticket.take() {
			ticket.withdraw();
		}
	}
}

impl Locator {
	/// Requests the service for `T` as a future.
	///
	/// Resolves immediately when the service is already registered; otherwise
	/// the request waits in the ledger until registration, rejection,
	/// cancellation or cleanup.
	pub fn get_async<T: Send + Sync + 'static>(&self, options: impl Into<RequestOptions>) -> ServiceFuture<T> {
		let (tx, rx) = oneshot::channel();
		let ticket = self.admit(
			ServiceKey::of::<T>(),
			&options.into(),
			Box::new(move |settlement| {
				let _ = tx.send(settlement);
			}),
		);
		ServiceFuture {
			rx: Some(rx),
			ticket,
			_marker: PhantomData,
		}
	}
}
