#![forbid(unsafe_code)]

//! End-to-end counter scenarios driven through the public API.
//!
//! Validates that:
//! 1. A synchronous increment notifies once and lands as data.
//! 2. A delayed increment is `waiting` immediately, notifies, then settles
//!    after one (lab) second with a second notification.
//! 3. The same flow works through a registry singleton with instances
//!    joining back into it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use fstate::{
    BoxError, Executor, Injection, InstanceRegistry, JoinPolicy, MutateOptions, Mutation,
    StateConfig, StateContainer, Status, Subscription,
};

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn record<T: 'static>(c: &StateContainer<T>, log: &Rc<RefCell<Vec<Status>>>) -> Subscription {
    let weak = c.downgrade();
    let log = Rc::clone(log);
    c.subscribe(move || {
        if let Some(c) = weak.upgrade() {
            log.borrow_mut().push(c.status());
        }
    })
}

fn increment_after(spawner: fstate::Spawner, delay: Duration) -> impl FnOnce(&i64) -> Mutation<i64> {
    move |n: &i64| {
        let n = *n;
        Mutation::future(async move {
            spawner.sleep(delay).await;
            Ok::<_, BoxError>(n + 1)
        })
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn counter_sync_then_async() {
    init_tracing();
    let exec = Executor::lab();
    let counter = StateContainer::builder("counter")
        .source(Injection::value(|| 0i64))
        .build(&exec.spawner())
        .unwrap();
    assert_eq!(counter.status(), Status::Data);
    assert!(counter.error().is_none());

    let log = Rc::new(RefCell::new(Vec::new()));
    let _sub = record(&counter, &log);

    counter
        .mutate(|n| Ok::<_, BoxError>(n + 1), MutateOptions::new())
        .unwrap();
    assert_eq!(counter.value(), Some(1));
    assert_eq!(*log.borrow(), vec![Status::Data]);

    counter
        .mutate(
            increment_after(exec.spawner(), Duration::from_secs(1)),
            MutateOptions::new(),
        )
        .unwrap();
    assert!(counter.is_waiting());
    assert_eq!(*log.borrow(), vec![Status::Data, Status::Waiting]);

    exec.advance(Duration::from_millis(999));
    assert!(counter.is_waiting());

    exec.advance(Duration::from_millis(1));
    assert_eq!(counter.status(), Status::Data);
    assert_eq!(counter.value(), Some(2));
    assert_eq!(
        *log.borrow(),
        vec![Status::Data, Status::Waiting, Status::Data]
    );
    assert_eq!(counter.notified_total(), 3);
}

#[test]
fn async_failure_lands_in_snapshot() {
    init_tracing();
    let exec = Executor::lab();
    let spawner = exec.spawner();
    let counter = StateContainer::builder("flaky")
        .source(Injection::value(|| 10i64))
        .build(&exec.spawner())
        .unwrap();
    let errors = Rc::new(Cell::new(0));
    let e = Rc::clone(&errors);

    counter
        .mutate(
            move |_| {
                Mutation::future(async move {
                    spawner.sleep(Duration::from_millis(50)).await;
                    Err::<i64, _>("upstream unavailable")
                })
            },
            MutateOptions::new().on_error(move |_| e.set(e.get() + 1)),
        )
        .unwrap();
    exec.run();

    assert!(counter.has_error());
    assert_eq!(counter.value(), Some(10));
    assert_eq!(
        counter.error().map(|e| e.message()).as_deref(),
        Some("upstream unavailable")
    );
    assert_eq!(errors.get(), 1);
}

#[test]
fn registry_counter_with_joining_instances() {
    init_tracing();
    let exec = Executor::lab();
    let registry = InstanceRegistry::new(&exec.spawner(), StateConfig::default());
    let make = || Injection::value(|| 0i64).join_policy(JoinPolicy::NewInstanceValue);

    let total = registry.get_singleton("counter", make).unwrap();
    let left = registry.get_seeded_instance("counter", "left", make).unwrap();
    let right = registry.get_seeded_instance("counter", "right", make).unwrap();

    let log = Rc::new(RefCell::new(Vec::new()));
    let _sub = record(&total, &log);

    left.mutate(
        increment_after(exec.spawner(), Duration::from_secs(1)),
        MutateOptions::new(),
    )
    .unwrap();
    right
        .mutate(|n| Ok::<_, BoxError>(n + 10), MutateOptions::new())
        .unwrap();
    assert_eq!(total.value(), Some(10));

    exec.advance(Duration::from_secs(1));
    assert_eq!(left.value(), Some(1));
    // last writer wins
    assert_eq!(total.value(), Some(1));
    assert_eq!(*log.borrow(), vec![Status::Data, Status::Data]);
}
