use std::sync::Arc;

use parking_lot::Mutex;

use super::*;

struct Probe;

fn recording_waiter(ledger: &mut Ledger, scope: Option<&str>, log: &Arc<Mutex<Vec<(u64, bool)>>>) -> WaiterId {
	let id = ledger.next_id();
	let log = Arc::clone(log);
	let complete: Completion = Box::new(move |outcome| log.lock().push((id.0, outcome.is_ok())));
	ledger.enqueue(ServiceKey::of::<Probe>(), Waiter::new(id, scope.map(ScopeId::from), complete));
	id
}

#[test]
fn take_preserves_request_order() {
	let log = Arc::new(Mutex::new(Vec::new()));
	let mut ledger = Ledger::default();
	let first = recording_waiter(&mut ledger, None, &log);
	let second = recording_waiter(&mut ledger, None, &log);

	let service: Service = Arc::new(Probe);
	for waiter in ledger.take(ServiceKey::of::<Probe>()) {
		waiter.settle(Ok(Arc::clone(&service)));
	}

	assert_eq!(*log.lock(), vec![(first.0, true), (second.0, true)]);
	assert_eq!(ledger.len(), 0);
}

#[test]
fn remove_is_single_shot() {
	let log = Arc::new(Mutex::new(Vec::new()));
	let mut ledger = Ledger::default();
	let id = recording_waiter(&mut ledger, None, &log);

	let waiter = ledger.remove(ServiceKey::of::<Probe>(), id).expect("pending waiter");
	assert!(ledger.remove(ServiceKey::of::<Probe>(), id).is_none());
	assert_eq!(ledger.pending(ServiceKey::of::<Probe>()), 0);

	waiter.settle(Err(LocatorError::Cancelled));
	assert_eq!(*log.lock(), vec![(id.0, false)]);
}

#[test]
fn take_scope_leaves_other_waiters() {
	let log = Arc::new(Mutex::new(Vec::new()));
	let mut ledger = Ledger::default();
	recording_waiter(&mut ledger, Some("level-1"), &log);
	let kept = recording_waiter(&mut ledger, Some("level-2"), &log);
	recording_waiter(&mut ledger, Some("level-1"), &log);
	let unscoped = recording_waiter(&mut ledger, None, &log);

	let taken = ledger.take_scope(&ScopeId::from("level-1"));
	assert_eq!(taken.len(), 2);
	assert_eq!(ledger.len(), 2);
	assert!(ledger.remove(ServiceKey::of::<Probe>(), kept).is_some());
	assert!(ledger.remove(ServiceKey::of::<Probe>(), unscoped).is_some());
}

#[test]
fn settling_releases_the_settled_token() {
	let mut ledger = Ledger::default();
	let id = ledger.next_id();
	let waiter = Waiter::new(id, None, Box::new(|_| {}));
	let settled = waiter.settled.clone();
	ledger.enqueue(ServiceKey::of::<Probe>(), waiter);

	assert!(!settled.is_cancelled());
	for waiter in ledger.drain() {
		waiter.discard();
	}
	assert!(settled.is_cancelled());
}
