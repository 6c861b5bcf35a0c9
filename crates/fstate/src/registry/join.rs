#![forbid(unsafe_code)]

//! Joining: how instance outcomes reach the singleton of their entity.
//!
//! Every container a registry builds holds a weak link to its [`Entity`]
//! record. After each transition the container reports to the record, which
//! applies the entity-level [`JoinPolicy`] and any per-call [`CallJoin`]
//! requests.
//!
//! # Invariants
//!
//! 1. Only instance transitions drive policies; singleton transitions only
//!    fan out per-call re-notifications.
//! 2. Writes into the singleton never report back, so joins cannot loop.
//! 3. Under [`JoinPolicy::CombinedInstances`] the singleton's status is
//!    [`combine_statuses`] over the live instances, recomputed and notified
//!    after every instance transition and whenever an instance is disposed
//!    or dropped. Once the last instance is gone the singleton is idle.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashSet;
use indexmap::IndexMap;
use tracing::debug;

use super::{EntityKey, Seed};
use crate::container::{CallJoin, ContainerRole, Context, Injection, StateContainer, WeakContainer};
use crate::observer::{ContainerId, TagFilter};
use crate::snapshot::{Snapshot, Status};

/// Entity-level rule for coupling instances to the singleton.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum JoinPolicy {
    /// Instances and singleton never interact on their own.
    #[default]
    None,
    /// Each terminal instance outcome overwrites the singleton.
    NewInstanceValue,
    /// The singleton's status is derived from all live instances.
    CombinedInstances,
}

/// Status of a group: error > waiting > data (only if all have data) > idle.
///
/// An empty group is idle.
///
/// ```
/// use fstate::{Status, combine_statuses};
///
/// let combined = combine_statuses([Status::Data, Status::Idle, Status::Error]);
/// assert_eq!(combined, Status::Error);
/// assert_eq!(combine_statuses([Status::Data, Status::Data]), Status::Data);
/// assert_eq!(combine_statuses([Status::Data, Status::Idle]), Status::Idle);
/// ```
pub fn combine_statuses<I>(statuses: I) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let mut any = false;
    let mut waiting = false;
    let mut all_data = true;
    for status in statuses {
        any = true;
        match status {
            Status::Error => return Status::Error,
            Status::Waiting => waiting = true,
            Status::Data => {}
            Status::Idle => all_data = false,
        }
    }
    if waiting {
        Status::Waiting
    } else if any && all_data {
        Status::Data
    } else {
        Status::Idle
    }
}

/// Receiver of a container's post-transition report.
pub(crate) trait JoinTarget<T> {
    fn after_transition(&self, source: &StateContainer<T>, join: &CallJoin<T>);
    /// `source` was disposed and leaves the lookup.
    fn detach(&self, source: &StateContainer<T>);
    /// The last handle to instance `id` is gone.
    fn released(&self, id: ContainerId);
}

/// Registry record for one key: the stored injection, the singleton, and a
/// weak lookup of instances by seed.
pub(crate) struct Entity<T> {
    key: EntityKey,
    injection: Injection<T>,
    ctx: Context,
    this: Weak<Entity<T>>,
    singleton: RefCell<Option<StateContainer<T>>>,
    instances: RefCell<IndexMap<Seed, WeakContainer<T>>>,
}

impl<T> fmt::Debug for Entity<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("key", &self.key)
            .field("policy", &self.injection.policy())
            .field("seeds", &self.instances.borrow().len())
            .finish()
    }
}

impl<T: Clone + 'static> Entity<T> {
    pub(crate) fn new(key: EntityKey, injection: Injection<T>, ctx: Context) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            key,
            injection,
            ctx,
            this: Weak::clone(this),
            singleton: RefCell::new(None),
            instances: RefCell::new(IndexMap::new()),
        })
    }

    fn link(&self) -> Weak<dyn JoinTarget<T>> {
        let link: Weak<dyn JoinTarget<T>> = self.this.clone();
        link
    }

    fn policy(&self) -> JoinPolicy {
        self.injection.policy()
    }

    pub(crate) fn singleton(&self) -> StateContainer<T> {
        if let Some(existing) = self.singleton.borrow().as_ref() {
            return existing.clone();
        }
        let created = StateContainer::create(
            self.key.clone(),
            ContainerRole::Singleton,
            Vec::new(),
            self.injection.clone(),
            self.ctx.clone(),
        );
        created.attach(self.link());
        self.singleton.replace(Some(created.clone()));
        // keep the source's own snapshot until an instance exists
        if self.policy() == JoinPolicy::CombinedInstances && !self.live_instances().is_empty() {
            self.recombine();
        }
        created
    }

    pub(crate) fn instance(&self, seed: Seed) -> StateContainer<T> {
        let cached = self
            .instances
            .borrow()
            .get(&seed)
            .and_then(WeakContainer::upgrade);
        if let Some(instance) = cached {
            return instance;
        }
        let created = StateContainer::create(
            self.key.clone(),
            ContainerRole::Instance,
            vec![seed.clone()],
            self.injection.clone(),
            self.ctx.clone(),
        );
        created.attach(self.link());
        {
            let mut instances = self.instances.borrow_mut();
            instances.retain(|_, weak| weak.is_alive());
            instances.insert(seed.clone(), created.downgrade());
        }
        debug!(key = %self.key, seed = %seed, container = %created.id(), "new instance");
        if self.policy() == JoinPolicy::CombinedInstances {
            self.recombine();
        }
        created
    }

    pub(crate) fn reset(&self, seed: &Seed) -> bool {
        let removed = self.instances.borrow_mut().shift_remove(seed);
        let Some(weak) = removed else {
            return false;
        };
        if let Some(instance) = weak.upgrade() {
            instance.remove_seed(seed);
            if !self.caches(&instance) {
                instance.unlink();
            }
        }
        if self.policy() == JoinPolicy::CombinedInstances {
            self.recombine();
        }
        true
    }

    pub(crate) fn add_seed(&self, instance: &StateContainer<T>, seed: Seed) -> bool {
        if instance.role() != ContainerRole::Instance || instance.key() != &self.key {
            return false;
        }
        instance.add_seed(seed.clone());
        self.instances
            .borrow_mut()
            .insert(seed.clone(), instance.downgrade());
        debug!(key = %self.key, seed = %seed, container = %instance.id(), "seed added");
        true
    }

    /// Live instances, each once, in first-seed order.
    pub(crate) fn live_instances(&self) -> Vec<StateContainer<T>> {
        let mut seen = AHashSet::new();
        self.instances
            .borrow()
            .values()
            .filter_map(WeakContainer::upgrade)
            .filter(|instance| seen.insert(instance.id()))
            .collect()
    }

    fn caches(&self, instance: &StateContainer<T>) -> bool {
        self.instances
            .borrow()
            .values()
            .filter_map(WeakContainer::upgrade)
            .any(|cached| cached.ptr_eq(instance))
    }

    fn overwrite_singleton(&self, source: &StateContainer<T>, derive: Option<&Rc<dyn Fn(&T) -> T>>) {
        let singleton = self.singleton();
        let snapshot = source.snapshot();
        let (next, joined) = if let Some(value) = snapshot.data_value() {
            let surfaced = derive.map_or_else(|| value.clone(), |derive| derive(value));
            (Snapshot::data(surfaced.clone()), Some(surfaced))
        } else if let Some(error) = snapshot.error() {
            (Snapshot::failed(error.clone(), singleton.value()), None)
        } else {
            return;
        };
        let notified = singleton.apply_join(next, joined);
        debug!(
            key = %self.key,
            from = %source.id(),
            status = %snapshot.status(),
            notified,
            "instance joined into singleton"
        );
    }

    fn recombine(&self) {
        let Some(singleton) = self.singleton.borrow().clone() else {
            return;
        };
        let instances = self.live_instances();
        let snapshots: Vec<_> = instances.iter().map(StateContainer::snapshot).collect();
        let status = combine_statuses(snapshots.iter().map(|s| s.status()));
        let error = snapshots.iter().find_map(|s| s.error()).cloned();
        let own = singleton
            .value()
            .or_else(|| snapshots.iter().rev().find_map(|s| s.value().cloned()));
        let next = match (status, error, own) {
            (Status::Error, Some(error), own) => Snapshot::failed(error, own),
            (Status::Waiting, _, own) => Snapshot::waiting(own),
            (Status::Data, _, Some(value)) => Snapshot::data(value),
            (_, _, own) => Snapshot::idle(own),
        };
        let notified = singleton.apply_join(next, None);
        debug!(
            key = %self.key,
            instances = instances.len(),
            status = %status,
            notified,
            "singleton recombined"
        );
    }

    fn renotify(&self, source: &StateContainer<T>, targets: Vec<StateContainer<T>>) {
        let filter = TagFilter::all();
        let mut reached = 0;
        let mut notified = 0;
        for target in targets.iter().filter(|t| !t.ptr_eq(source)) {
            reached += 1;
            notified += target.notify(&filter);
        }
        debug!(key = %self.key, from = %source.id(), reached, notified, "re-notified containers");
    }
}

impl<T: Clone + 'static> JoinTarget<T> for Entity<T> {
    fn after_transition(&self, source: &StateContainer<T>, join: &CallJoin<T>) {
        if source.role() == ContainerRole::Instance {
            let terminal = source.status().is_terminal();
            let policy = self.policy();
            if terminal && (policy == JoinPolicy::NewInstanceValue || join.joins_singleton()) {
                self.overwrite_singleton(source, join.derive.as_ref());
            }
            if policy == JoinPolicy::CombinedInstances {
                self.recombine();
            }
        }

        if join.notifies_all_instances() {
            let mut targets: Vec<_> = self.singleton.borrow().iter().cloned().collect();
            targets.extend(self.live_instances());
            self.renotify(source, targets);
        } else if !join.seeds().is_empty() {
            let mut seen = AHashSet::new();
            let targets: Vec<_> = {
                let instances = self.instances.borrow();
                join.seeds()
                    .iter()
                    .filter_map(|seed| instances.get(seed))
                    .filter_map(WeakContainer::upgrade)
                    .filter(|instance| seen.insert(instance.id()))
                    .collect()
            };
            self.renotify(source, targets);
        }
    }

    fn detach(&self, source: &StateContainer<T>) {
        let removed = {
            let mut instances = self.instances.borrow_mut();
            let before = instances.len();
            instances.retain(|_, weak| weak.upgrade().is_none_or(|cached| !cached.ptr_eq(source)));
            before - instances.len()
        };
        debug!(key = %self.key, container = %source.id(), removed, "instance detached");
        if self.policy() == JoinPolicy::CombinedInstances {
            self.recombine();
        }
    }

    fn released(&self, id: ContainerId) {
        let removed = {
            let mut instances = self.instances.borrow_mut();
            let before = instances.len();
            instances.retain(|_, weak| weak.is_alive());
            before - instances.len()
        };
        debug!(key = %self.key, container = %id, removed, "instance released");
        if self.policy() == JoinPolicy::CombinedInstances {
            self.recombine();
        }
    }
}
