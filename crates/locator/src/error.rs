use std::error::Error as StdError;
use std::sync::Arc;

use crate::key::{ScopeId, ServiceKey};

/// Shared, cloneable application error carried by [`LocatorError::Rejected`].
pub type RejectReason = Arc<dyn StdError + Send + Sync>;

/// Terminal failure states surfaced by the locator and its adapters.
///
/// Errors are cloneable: one rejection fans out to every pending waiter and
/// every combinator branch unchanged.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum LocatorError {
	/// A producer tried to register an absent instance.
	#[error("cannot register a null instance for {service}")]
	NullArgument { service: ServiceKey },
	/// No instance is registered for the requested type.
	#[error("no service registered for {service}")]
	NotFound { service: ServiceKey },
	/// The request was cancelled through its token or by a global cleanup.
	#[error("service request was cancelled")]
	Cancelled,
	/// A producer signalled that the service will never become available.
	#[error("service {service} was rejected: {reason}")]
	Rejected {
		service: ServiceKey,
		#[source]
		reason: RejectReason,
	},
	/// The scope a pending request belonged to was unloaded.
	#[error("scope {scope} was disposed while a request was pending")]
	Disposed { scope: ScopeId },
	/// A stored instance did not downcast to the type it was keyed by.
	#[error("registered instance for {service} has an unexpected type")]
	TypeMismatch { service: ServiceKey },
	/// A promise continuation panicked.
	#[error("continuation panicked: {0}")]
	Continuation(String),
}

impl LocatorError {
	/// Builds a rejection for `service` from any application error.
	pub fn rejected(service: ServiceKey, reason: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
		Self::Rejected {
			service,
			reason: Arc::from(reason.into()),
		}
	}

	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}

	pub fn is_disposed(&self) -> bool {
		matches!(self, Self::Disposed { .. })
	}

	pub fn is_rejected(&self) -> bool {
		matches!(self, Self::Rejected { .. })
	}
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
	if let Some(msg) = payload.downcast_ref::<&'static str>() {
		(*msg).to_string()
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg.clone()
	} else {
		"non-string panic payload".to_string()
	}
}
