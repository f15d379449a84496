use std::sync::atomic::{AtomicUsize, Ordering};

use pretty_assertions::assert_eq;

use super::*;
use crate::event::RegistryEvent;

#[derive(Debug)]
struct Config {
	volume: u32,
}

#[derive(Debug)]
struct Network;

#[test]
fn resolved_promise_runs_then_immediately() {
	let locator = Locator::new();
	locator.register(Config { volume: 7 });

	let doubled = locator.get_promise::<Config>(RequestOptions::new()).then(|config| Ok(config.volume * 2));
	assert_eq!(doubled.outcome().map(|o| o.ok()), Some(Some(14)));
}

#[test]
fn then_chain_waits_for_registration() {
	let locator = Locator::new();
	let promise = locator.get_promise::<Config>(RequestOptions::new());
	let chained = promise.then(|config| Ok(config.volume + 1)).then(|volume| Ok(volume.to_string()));
	assert!(chained.is_pending());
	assert_eq!(locator.pending::<Config>(), 1);

	locator.register(Config { volume: 41 });
	assert!(!promise.is_pending());
	assert_eq!(chained.outcome().and_then(Result::ok).as_deref(), Some("42"));
}

#[test]
fn rejection_skips_then_and_reaches_catch() {
	let locator = Locator::new();
	let ran = Arc::new(AtomicUsize::new(0));
	let seen = Arc::clone(&ran);
	let handled = locator
		.get_promise::<Network>(RequestOptions::new())
		.then(move |network| {
			seen.fetch_add(1, Ordering::SeqCst);
			Ok(network)
		})
		.catch(|error| {
			assert!(error.is_rejected());
			Ok(())
		});

	locator.reject::<Network>("offline");
	assert_eq!(ran.load(Ordering::SeqCst), 0);
	assert!(matches!(handled.outcome(), Some(Ok(None))));
}

#[test]
fn catch_passes_values_through() {
	let promise = ServicePromise::resolved(3_u8).catch(|_| Ok(()));
	assert!(matches!(promise.outcome(), Some(Ok(Some(3)))));
}

#[test]
fn catch_handler_error_replaces_rejection() {
	let promise = ServicePromise::<u8>::rejected(LocatorError::Cancelled).catch(|_| Err(LocatorError::rejected(ServiceKey::of::<u8>(), "handler failed")));
	let outcome = promise.outcome().unwrap();
	assert!(matches!(outcome, Err(ref e) if e.is_rejected()));
}

#[test]
fn recover_supplies_replacement() {
	let promise = ServicePromise::<u32>::rejected(LocatorError::Cancelled).recover(|error| {
		assert!(error.is_cancelled());
		Ok(5)
	});
	assert!(matches!(promise.outcome(), Some(Ok(5))));
}

#[test]
fn panicking_continuation_rejects() {
	let promise = ServicePromise::resolved(1_u8).then(|_| -> crate::Result<u8> { panic!("renderer blew up") });
	match promise.outcome() {
		Some(Err(LocatorError::Continuation(message))) => assert_eq!(message, "renderer blew up"),
		other => panic!("unexpected outcome: {other:?}"),
	}
}

#[test]
fn panicking_observer_does_not_break_registration() {
	let locator = Locator::new();
	let first = locator.get_promise::<Network>(RequestOptions::new());
	first.on_settle(|_| panic!("observer exploded"));
	let second = locator.get_promise::<Network>(RequestOptions::new());
	let mut events = locator.subscribe();

	locator.register(Network);
	assert!(matches!(second.outcome(), Some(Ok(_))));
	assert!(matches!(first.outcome(), Some(Ok(_))));
	assert!(matches!(events.try_recv(), Ok(RegistryEvent::Registered { resolved: 2, .. })));
	assert_eq!(locator.pending_total(), 0);
}

#[test]
fn panicking_observer_spares_later_observers() {
	let promise = ServicePromise::resolved(4_u8);
	let seen = Arc::new(AtomicUsize::new(0));
	promise.on_settle(|_| panic!("first observer"));
	let sink = Arc::clone(&seen);
	promise.on_settle(move |_| {
		sink.fetch_add(1, Ordering::SeqCst);
	});
	assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn late_subscribers_see_settled_outcome() {
	let promise = ServicePromise::resolved(9_u8);
	let seen = Arc::new(AtomicUsize::new(0));
	let sink = Arc::clone(&seen);
	promise.on_settle(move |outcome| {
		sink.store(usize::from(outcome.unwrap_or_default()), Ordering::SeqCst);
	});
	assert_eq!(seen.load(Ordering::SeqCst), 9);
}

#[test]
fn dropping_promise_keeps_request_queued() {
	let locator = Locator::new();
	drop(locator.get_promise::<Network>(RequestOptions::new()));
	assert_eq!(locator.pending::<Network>(), 1);

	locator.register(Network);
	assert_eq!(locator.pending::<Network>(), 0);
}

#[test]
fn cleanup_cancels_pending_promise() {
	let locator = Locator::new();
	let promise = locator.get_promise::<Network>(RequestOptions::new());
	locator.cleanup();
	assert!(matches!(promise.outcome(), Some(Err(LocatorError::Cancelled))));
}

#[tokio::test]
async fn settled_awaits_resolution() {
	let locator = Locator::new();
	let promise = locator.get_promise::<Config>(RequestOptions::new());
	let producer = locator.clone();
	tokio::spawn(async move {
		producer.register(Config { volume: 3 });
	});

	assert_eq!(promise.settled().await.map(|c| c.volume).ok(), Some(3));
}
