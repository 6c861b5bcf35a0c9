//! Property-based invariant tests for containers, notification, and joining.
//!
//! 1. Status, value, and error stay consistent after any sequence of
//!    synchronous and delayed mutations.
//! 2. Tag filtering reaches exactly the admitted subscribers.
//! 3. Watch suppression notifies only when the projection changes, for
//!    synchronous and delayed mutations alike.
//! 4. The combined singleton status follows error > waiting > data > idle
//!    over the instances still alive, including none at all.

use std::cell::Cell;
use std::rc::Rc;

use fstate::{
    BoxError, Executor, Injection, InstanceRegistry, JoinPolicy, MutateOptions, Mutation,
    StateConfig, StateContainer, Status, TagFilter, combine_statuses,
};
use proptest::prelude::*;

// ── Strategies ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Step {
    Set(i32),
    Fail,
    Delayed(i32),
    DelayedFail,
    Drive,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (-100i32..100).prop_map(Step::Set),
        Just(Step::Fail),
        (-100i32..100).prop_map(Step::Delayed),
        Just(Step::DelayedFail),
        Just(Step::Drive),
    ]
}

#[derive(Debug, Clone, Copy)]
enum Fate {
    Keep,
    Dispose,
    Release,
}

fn fate_strategy() -> impl Strategy<Value = Fate> {
    prop_oneof![Just(Fate::Keep), Just(Fate::Dispose), Just(Fate::Release)]
}

fn status_strategy() -> impl Strategy<Value = Status> {
    prop_oneof![
        Just(Status::Idle),
        Just(Status::Waiting),
        Just(Status::Data),
        Just(Status::Error),
    ]
}

fn apply(c: &StateContainer<i32>, exec: &Executor, step: &Step) {
    let caught = MutateOptions::new().catch_error(true);
    match *step {
        Step::Set(v) => c.mutate(move |_| Ok::<_, BoxError>(v), caught).unwrap(),
        Step::Fail => c.mutate(|_| Err::<i32, _>("fail"), caught).unwrap(),
        Step::Delayed(v) => c
            .mutate(
                move |_| Mutation::future(async move { Ok::<_, BoxError>(v) }),
                caught,
            )
            .unwrap(),
        Step::DelayedFail => c
            .mutate(
                |_| Mutation::future(async { Err::<i32, _>("late") }),
                caught,
            )
            .unwrap(),
        Step::Drive => exec.run_until_stalled(),
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Snapshot consistency
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn status_value_error_stay_consistent(steps in proptest::collection::vec(step_strategy(), 1..40)) {
        let exec = Executor::lab();
        let c = StateContainer::builder("prop")
            .source(Injection::value(|| 0))
            .build(&exec.spawner())
            .unwrap();
        let mut last_version = c.version();

        for step in &steps {
            apply(&c, &exec, step);
            let snap = c.snapshot();
            prop_assert_eq!(snap.error().is_some(), snap.status() == Status::Error);
            prop_assert_eq!(snap.data_value().is_some(), snap.status() == Status::Data);
            prop_assert!(c.version() >= last_version);
            last_version = c.version();
        }

        exec.run_until_stalled();
        prop_assert!(c.status().is_terminal());
    }

    #[test]
    fn delayed_mutation_is_waiting_until_driven(v in any::<i32>()) {
        let exec = Executor::lab();
        let c = StateContainer::builder("prop")
            .source(Injection::value(|| 0))
            .build(&exec.spawner())
            .unwrap();
        c.mutate(move |_| Mutation::future(async move { Ok::<_, BoxError>(v) }), MutateOptions::new())
            .unwrap();
        prop_assert_eq!(c.status(), Status::Waiting);
        exec.run_until_stalled();
        prop_assert_eq!(c.status(), Status::Data);
        prop_assert_eq!(c.value(), Some(v));
    }

    #[test]
    fn uncaught_sync_failure_always_returns_error(v in any::<i32>()) {
        let exec = Executor::lab();
        let c = StateContainer::builder("prop")
            .source(Injection::value(move || v))
            .build(&exec.spawner())
            .unwrap();
        let result = c.mutate(|_| Err::<i32, _>("boom"), MutateOptions::new());
        prop_assert!(result.is_err());
        prop_assert!(c.has_error());
        prop_assert_eq!(c.value(), Some(v));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Tag filtering
// ═════════════════════════════════════════════════════════════════════════

const TAGS: [&str; 4] = ["a", "b", "c", "d"];

proptest! {
    #[test]
    fn filtered_notification_reaches_admitted_subscribers(
        subscriber_tags in proptest::collection::vec(proptest::option::of(0usize..4), 0..12),
        filter_tags in proptest::collection::vec(0usize..4, 0..3),
    ) {
        let exec = Executor::lab();
        let c = StateContainer::builder("tags")
            .source(Injection::value(|| 0))
            .build(&exec.spawner())
            .unwrap();

        let mut counters = Vec::new();
        let mut guards = Vec::new();
        for tag in &subscriber_tags {
            let hits = Rc::new(Cell::new(0u32));
            let h = Rc::clone(&hits);
            let guard = match tag {
                Some(i) => c.subscribe_tagged(TAGS[*i], move || h.set(h.get() + 1)),
                None => c.subscribe(move || h.set(h.get() + 1)),
            };
            counters.push(hits);
            guards.push(guard);
        }

        let filter = TagFilter::only(filter_tags.iter().map(|i| TAGS[*i]));
        let notified = c.notify(&filter);

        let mut expected = 0;
        for (tag, hits) in subscriber_tags.iter().zip(&counters) {
            let admitted = filter_tags.is_empty()
                || tag.is_none_or(|i| filter_tags.contains(&i));
            prop_assert_eq!(hits.get(), u32::from(admitted));
            expected += usize::from(admitted);
        }
        prop_assert_eq!(notified, expected);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Watch suppression
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn watch_notifies_only_on_projection_change(
        values in proptest::collection::vec((0i32..20, any::<bool>()), 1..30),
    ) {
        let exec = Executor::lab();
        let c = StateContainer::builder("watched")
            .source(Injection::value(|| 0))
            .build(&exec.spawner())
            .unwrap();
        let hits = Rc::new(Cell::new(0usize));
        let h = Rc::clone(&hits);
        let _sub = c.subscribe(move || h.set(h.get() + 1));

        let mut previous = 0;
        let mut expected = 0;
        for (v, delayed) in values {
            let options = MutateOptions::new().watch(|n: &i32| n / 5);
            if delayed {
                c.mutate(
                    move |_| Mutation::future(async move { Ok::<_, BoxError>(v) }),
                    options,
                )
                .unwrap();
                // entering waiting is a status change
                expected += 1;
                exec.run_until_stalled();
            } else {
                c.mutate(move |_| Ok::<_, BoxError>(v), options).unwrap();
            }
            if previous / 5 != v / 5 {
                expected += 1;
            }
            previous = v;
        }
        prop_assert_eq!(hits.get(), expected);
        prop_assert_eq!(c.value(), Some(previous));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Combined instances
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn combine_precedence_is_fixed(statuses in proptest::collection::vec(status_strategy(), 0..8)) {
        let combined = combine_statuses(statuses.iter().copied());
        let expected = if statuses.contains(&Status::Error) {
            Status::Error
        } else if statuses.contains(&Status::Waiting) {
            Status::Waiting
        } else if !statuses.is_empty() && statuses.iter().all(|s| *s == Status::Data) {
            Status::Data
        } else {
            Status::Idle
        };
        prop_assert_eq!(combined, expected);
    }

    #[test]
    fn combined_singleton_tracks_instances(
        members in proptest::collection::vec(
            (proptest::option::of(any::<bool>()), fate_strategy()),
            0..6,
        ),
    ) {
        let exec = Executor::lab();
        let registry = InstanceRegistry::new(&exec.spawner(), StateConfig::default());
        let make = || Injection::<i32>::empty().join_policy(JoinPolicy::CombinedInstances);
        let singleton = registry.get_singleton("group", make).unwrap();

        let mut kept = Vec::new();
        for (i, (outcome, fate)) in members.iter().enumerate() {
            let instance = registry
                .get_seeded_instance("group", format!("seed-{i}"), make)
                .unwrap();
            match outcome {
                Some(true) => instance.set(i as i32).unwrap(),
                Some(false) => instance.set_error("bad").unwrap(),
                None => {}
            }
            match fate {
                Fate::Keep => kept.push(instance),
                Fate::Dispose => instance.dispose(),
                Fate::Release => drop(instance),
            }
        }

        let statuses: Vec<Status> = kept.iter().map(|c| c.status()).collect();
        prop_assert_eq!(singleton.status(), combine_statuses(statuses));
        prop_assert_eq!(registry.instance_count("group"), kept.len());
    }
}
