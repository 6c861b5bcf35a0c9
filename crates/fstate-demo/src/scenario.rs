//! Scripted scenarios. Each one drives real containers on the given
//! executor, writes what subscribers observed into a [`Transcript`], and
//! fails with [`DemoError::Unexpected`] if the final state is wrong.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use fstate::{
    BoxError, Executor, Injection, InstanceRegistry, JoinPolicy, MutateOptions, Mutation,
    StateConfig, StateContainer, Status, Subscription,
};

use crate::error::{DemoError, Result};

#[derive(Debug, Clone)]
pub struct Settings {
    pub delay: Duration,
    pub instances: usize,
    pub config: StateConfig,
}

/// Lines written by subscribers, shared between the scenario and its
/// callbacks.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    lines: Rc<RefCell<Vec<String>>>,
}

impl Transcript {
    pub fn push(&self, line: impl Into<String>) {
        self.lines.borrow_mut().push(line.into());
    }

    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    fn follow(&self, label: impl Into<String>, c: &StateContainer<i64>) -> Subscription {
        let label = label.into();
        let weak = c.downgrade();
        let out = self.clone();
        c.subscribe(move || {
            if let Some(c) = weak.upgrade() {
                out.push(format!("  {label}: {} {:?}", c.status().label(), c.value()));
            }
        })
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines.borrow().iter() {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

fn add_after(exec: &Executor, delay: Duration, amount: i64) -> impl FnOnce(&i64) -> Mutation<i64> {
    let spawner = exec.spawner();
    move |n: &i64| {
        let n = *n;
        Mutation::future(async move {
            spawner.sleep(delay).await;
            Ok::<_, BoxError>(n + amount)
        })
    }
}

fn expect_value(scenario: &'static str, c: &StateContainer<i64>, want: i64) -> Result<()> {
    match (c.status(), c.value()) {
        (Status::Data, Some(got)) if got == want => Ok(()),
        (status, got) => Err(DemoError::unexpected(
            scenario,
            format!("{} is {} {got:?}, expected data {want}", c.name(), status.label()),
        )),
    }
}

/// Increment once synchronously, then once after `delay`.
pub fn counter(exec: &Executor, settings: &Settings, out: &Transcript) -> Result<()> {
    out.push("== counter");
    let counter = StateContainer::builder("counter")
        .source(Injection::value(|| 0i64))
        .config(settings.config)
        .build(&exec.spawner())?;
    let _sub = out.follow("counter", &counter);

    counter.mutate(|n| Ok::<_, BoxError>(n + 1), MutateOptions::new())?;
    counter.mutate(add_after(exec, settings.delay, 1), MutateOptions::new())?;
    exec.advance(settings.delay);

    expect_value("counter", &counter, 2)?;
    tracing::debug!(notified = counter.notified_total(), "counter finished");
    Ok(())
}

/// Every instance write overwrites the singleton; the last one wins.
pub fn new_instance_value(exec: &Executor, settings: &Settings, out: &Transcript) -> Result<()> {
    out.push("== new-instance");
    let registry = InstanceRegistry::new(&exec.spawner(), settings.config);
    let make = || Injection::value(|| 0i64).join_policy(JoinPolicy::NewInstanceValue);

    let total = registry.get_singleton("total", make)?;
    let _sub = out.follow("total", &total);

    let mut rows = Vec::with_capacity(settings.instances);
    for i in 0..settings.instances {
        rows.push(registry.get_seeded_instance("total", format!("row-{i}"), make)?);
    }
    for (i, row) in rows.iter().enumerate() {
        let value = (i as i64 + 1) * 10;
        row.mutate(move |_| Ok::<_, BoxError>(value), MutateOptions::new())?;
    }
    let last = rows.len() as i64 * 10;
    expect_value("new-instance", &total, last)?;

    let Some(first) = rows.first() else {
        return Err(DemoError::unexpected("new-instance", "no instances requested"));
    };
    first.mutate(add_after(exec, settings.delay, 1), MutateOptions::new())?;
    exec.advance(settings.delay);
    expect_value("new-instance", &total, 11)
}

/// The singleton status follows its instances: error, then waiting, then
/// data once every instance has data.
pub fn combined_instances(exec: &Executor, settings: &Settings, out: &Transcript) -> Result<()> {
    out.push("== combined");
    let registry = InstanceRegistry::new(&exec.spawner(), settings.config);
    let make = || Injection::<i64>::empty().join_policy(JoinPolicy::CombinedInstances);

    let group = registry.get_singleton("group", make)?;
    let sub = out.follow("group", &group);

    let mut parts = Vec::with_capacity(settings.instances);
    for i in 0..settings.instances {
        let part = registry.get_seeded_instance("group", format!("part-{i}"), make)?;
        let spawner = exec.spawner();
        let delay = settings.delay * (i as u32 + 1);
        let value = i as i64;
        part.mutate_with(
            move |_| {
                Mutation::future(async move {
                    spawner.sleep(delay).await;
                    Ok::<_, BoxError>(value)
                })
            },
            MutateOptions::new(),
        )?;
        parts.push(part);
    }
    if group.status() != Status::Waiting {
        return Err(DemoError::unexpected(
            "combined",
            format!("group is {} while parts load", group.status().label()),
        ));
    }

    exec.advance(settings.delay * settings.instances as u32);
    if group.status() != Status::Data {
        return Err(DemoError::unexpected(
            "combined",
            format!("group is {} after every part loaded", group.status().label()),
        ));
    }

    if let Some(last) = parts.last() {
        last.set_error("part unavailable")?;
    }
    if group.status() != Status::Error {
        return Err(DemoError::unexpected(
            "combined",
            format!("group is {} after a part failed", group.status().label()),
        ));
    }
    // releasing the parts recombines the group; stop recording first
    drop(sub);
    Ok(())
}
