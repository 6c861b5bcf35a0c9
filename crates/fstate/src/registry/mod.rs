#![forbid(unsafe_code)]

//! Get-or-create cache of singleton and seeded instance containers.
//!
//! Each registry key names one logical entity. The first request for a key
//! runs the caller's factory to obtain an [`Injection`]; every container for
//! that key is then built from the stored injection.
//!
//! # Invariants
//!
//! 1. At most one singleton exists per key for the registry's lifetime
//!    (until [`InstanceRegistry::remove`] or [`InstanceRegistry::clear`]).
//! 2. The same `(key, seed)` yields the same instance while any caller keeps
//!    it alive and it has not been reset.
//! 3. The registry owns singletons and only weakly references instances.
//!
//! # Failure Modes
//!
//! - Requesting an existing key with a different value type returns
//!   [`StateError::TypeMismatch`]; the stored entity is left untouched.
//! - Factories run outside internal borrows, so a factory may itself use the
//!   registry. If it registers the same key, the first registration wins.

mod join;

pub use join::{JoinPolicy, combine_statuses};
pub(crate) use join::JoinTarget;

use std::any::{Any, type_name};
use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;
use tracing::{debug, warn};

use self::join::Entity;
use crate::config::StateConfig;
use crate::container::{Context, Injection, StateContainer};
use crate::error::{Result, StateError};
use crate::executor::Spawner;
use crate::observer::ObserverRegistry;

/// Name of a logical entity in a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey(Cow<'static, str>);

impl EntityKey {
    #[must_use]
    pub const fn new(key: &'static str) -> Self {
        Self(Cow::Borrowed(key))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for EntityKey {
    fn from(key: &'static str) -> Self {
        Self(Cow::Borrowed(key))
    }
}

impl From<String> for EntityKey {
    fn from(key: String) -> Self {
        Self(Cow::Owned(key))
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier grouping instances of one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Seed {
    /// The seed used when a caller does not name one.
    #[default]
    Default,
    Named(Cow<'static, str>),
}

impl From<&'static str> for Seed {
    fn from(seed: &'static str) -> Self {
        Self::Named(Cow::Borrowed(seed))
    }
}

impl From<String> for Seed {
    fn from(seed: String) -> Self {
        Self::Named(Cow::Owned(seed))
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("<default>"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Type-erased view of an entity, for operations that don't need `T`.
trait ErasedEntity {
    fn as_any(self: Rc<Self>) -> Rc<dyn Any>;
    fn reset(&self, seed: &Seed) -> bool;
    fn live_count(&self) -> usize;
}

impl<T: Clone + 'static> ErasedEntity for Entity<T> {
    fn as_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn reset(&self, seed: &Seed) -> bool {
        Entity::reset(self, seed)
    }

    fn live_count(&self) -> usize {
        Entity::live_instances(self).len()
    }
}

/// Creates and caches containers per entity key.
///
/// Pass it by reference; tests build a fresh one or call
/// [`clear`](Self::clear) between cases.
pub struct InstanceRegistry {
    ctx: Context,
    entities: RefCell<AHashMap<EntityKey, Rc<dyn ErasedEntity>>>,
}

impl fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("entities", &self.entities.borrow().len())
            .field("config", &self.ctx.config)
            .finish()
    }
}

impl InstanceRegistry {
    #[must_use]
    pub fn new(spawner: &Spawner, config: StateConfig) -> Self {
        Self {
            ctx: Context {
                spawner: spawner.clone(),
                observers: Rc::new(ObserverRegistry::new()),
                config,
            },
            entities: RefCell::new(AHashMap::new()),
        }
    }

    /// The observer registry shared by every container this registry builds.
    #[must_use]
    pub fn observers(&self) -> &Rc<ObserverRegistry> {
        &self.ctx.observers
    }

    #[must_use]
    pub fn config(&self) -> StateConfig {
        self.ctx.config
    }

    #[must_use]
    pub fn spawner(&self) -> &Spawner {
        &self.ctx.spawner
    }

    /// The shared container for `key`, created on first request.
    ///
    /// # Errors
    ///
    /// [`StateError::TypeMismatch`] if `key` holds a different value type.
    pub fn get_singleton<T, F>(&self, key: impl Into<EntityKey>, factory: F) -> Result<StateContainer<T>>
    where
        T: Clone + 'static,
        F: FnOnce() -> Injection<T>,
    {
        Ok(self.entity(key.into(), factory)?.singleton())
    }

    /// The instance for `key` under the default seed.
    ///
    /// # Errors
    ///
    /// [`StateError::TypeMismatch`] if `key` holds a different value type.
    pub fn get_instance<T, F>(&self, key: impl Into<EntityKey>, factory: F) -> Result<StateContainer<T>>
    where
        T: Clone + 'static,
        F: FnOnce() -> Injection<T>,
    {
        self.get_seeded_instance(key, Seed::Default, factory)
    }

    /// The instance for `key` under `seed`, created if none is cached.
    ///
    /// # Errors
    ///
    /// [`StateError::TypeMismatch`] if `key` holds a different value type.
    pub fn get_seeded_instance<T, F>(
        &self,
        key: impl Into<EntityKey>,
        seed: impl Into<Seed>,
        factory: F,
    ) -> Result<StateContainer<T>>
    where
        T: Clone + 'static,
        F: FnOnce() -> Injection<T>,
    {
        Ok(self.entity(key.into(), factory)?.instance(seed.into()))
    }

    /// Evict the instance cached under `(key, seed)`. Returns `false` if
    /// nothing was cached there.
    pub fn reset_instance(&self, key: impl Into<EntityKey>, seed: impl Into<Seed>) -> bool {
        let key = key.into();
        let seed = seed.into();
        let Some(entity) = self.entities.borrow().get(&key).cloned() else {
            return false;
        };
        let evicted = entity.reset(&seed);
        debug!(key = %key, seed = %seed, evicted, "reset instance");
        evicted
    }

    /// Also cache `instance` under `seed`. Returns `false` if `instance` is
    /// not an instance of `key`.
    ///
    /// # Errors
    ///
    /// [`StateError::TypeMismatch`] if `key` holds a different value type.
    pub fn add_seed<T: Clone + 'static>(
        &self,
        key: impl Into<EntityKey>,
        instance: &StateContainer<T>,
        seed: impl Into<Seed>,
    ) -> Result<bool> {
        let key = key.into();
        match self.lookup::<T>(&key)? {
            Some(entity) => Ok(entity.add_seed(instance, seed.into())),
            None => Ok(false),
        }
    }

    /// Live instances of `key`, in the order their seeds were first cached.
    ///
    /// # Errors
    ///
    /// [`StateError::TypeMismatch`] if `key` holds a different value type.
    pub fn instances<T: Clone + 'static>(
        &self,
        key: impl Into<EntityKey>,
    ) -> Result<Vec<StateContainer<T>>> {
        let key = key.into();
        Ok(self
            .lookup::<T>(&key)?
            .map(|entity| entity.live_instances())
            .unwrap_or_default())
    }

    #[must_use]
    pub fn instance_count(&self, key: impl Into<EntityKey>) -> usize {
        self.entities
            .borrow()
            .get(&key.into())
            .map_or(0, |entity| entity.live_count())
    }

    #[must_use]
    pub fn contains(&self, key: impl Into<EntityKey>) -> bool {
        self.entities.borrow().contains_key(&key.into())
    }

    /// Forget `key`. Containers already handed out keep working but no
    /// longer join.
    pub fn remove(&self, key: impl Into<EntityKey>) -> bool {
        let key = key.into();
        let removed = self.entities.borrow_mut().remove(&key).is_some();
        debug!(key = %key, removed, "remove entity");
        removed
    }

    /// Forget every entity.
    pub fn clear(&self) {
        let entities = std::mem::take(&mut *self.entities.borrow_mut());
        debug!(count = entities.len(), "clear registry");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.borrow().is_empty()
    }

    fn entity<T, F>(&self, key: EntityKey, factory: F) -> Result<Rc<Entity<T>>>
    where
        T: Clone + 'static,
        F: FnOnce() -> Injection<T>,
    {
        if let Some(entity) = self.lookup::<T>(&key)? {
            return Ok(entity);
        }
        let injection = factory();
        let policy = injection.policy();
        let created: Rc<dyn ErasedEntity> = Entity::new(key.clone(), injection, self.ctx.clone());
        let stored = Rc::clone(
            self.entities
                .borrow_mut()
                .entry(key.clone())
                .or_insert(created),
        );
        debug!(key = %key, policy = ?policy, value_type = type_name::<T>(), "register entity");
        downcast(&key, stored)
    }

    fn lookup<T: Clone + 'static>(&self, key: &EntityKey) -> Result<Option<Rc<Entity<T>>>> {
        let erased = self.entities.borrow().get(key).cloned();
        erased.map(|entity| downcast(key, entity)).transpose()
    }
}

fn downcast<T: Clone + 'static>(
    key: &EntityKey,
    erased: Rc<dyn ErasedEntity>,
) -> Result<Rc<Entity<T>>> {
    erased.as_any().downcast::<Entity<T>>().map_err(|_| {
        warn!(key = %key, requested = type_name::<T>(), "entity type mismatch");
        StateError::TypeMismatch {
            key: key.to_string(),
            expected: type_name::<T>(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::executor::Executor;
    use std::cell::Cell;

    fn registry(exec: &Executor) -> InstanceRegistry {
        InstanceRegistry::new(&exec.spawner(), StateConfig::default())
    }

    #[test]
    fn singleton_is_shared() {
        let exec = Executor::lab();
        let reg = registry(&exec);
        let a = reg.get_singleton("count", || Injection::value(|| 0)).unwrap();
        let b = reg.get_singleton("count", || Injection::value(|| 99)).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(b.value(), Some(0));
        assert!(!a.is_new_instance());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn factory_runs_once_per_key() {
        let exec = Executor::lab();
        let reg = registry(&exec);
        let calls = Rc::new(Cell::new(0));
        for seed in ["a", "b", "c"] {
            let calls = Rc::clone(&calls);
            reg.get_seeded_instance("item", seed, move || {
                calls.set(calls.get() + 1);
                Injection::value(|| 1u8)
            })
            .unwrap();
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn seeded_instances_are_cached_per_seed() {
        let exec = Executor::lab();
        let reg = registry(&exec);
        let make = || Injection::value(|| 0u32);
        let a1 = reg.get_seeded_instance("row", "a", make).unwrap();
        let a2 = reg.get_seeded_instance("row", "a", make).unwrap();
        let b = reg.get_seeded_instance("row", "b", make).unwrap();
        let d1 = reg.get_instance("row", make).unwrap();
        let d2 = reg.get_instance("row", make).unwrap();

        assert!(a1.ptr_eq(&a2));
        assert!(!a1.ptr_eq(&b));
        assert!(d1.ptr_eq(&d2));
        assert!(a1.is_new_instance());
        assert_eq!(a1.seeds(), vec![Seed::from("a")]);
        assert_eq!(d1.seeds(), vec![Seed::Default]);
        assert_eq!(reg.instance_count("row"), 3);
    }

    #[test]
    fn reset_rebuilds_from_factory() {
        let exec = Executor::lab();
        let reg = registry(&exec);
        let make = || Injection::value(|| 0u32);
        let first = reg.get_seeded_instance("row", "a", make).unwrap();
        first.set(5).unwrap();

        assert!(reg.reset_instance("row", "a"));
        assert!(!reg.reset_instance("row", "a"));
        assert!(!reg.reset_instance("missing", "a"));

        let second = reg.get_seeded_instance("row", "a", make).unwrap();
        assert!(!first.ptr_eq(&second));
        assert_eq!(second.value(), Some(0));
        assert_eq!(first.value(), Some(5));
    }

    #[test]
    fn dropped_instance_is_rebuilt() {
        let exec = Executor::lab();
        let reg = registry(&exec);
        let make = || Injection::value(|| 0u32);
        let id = {
            let tmp = reg.get_seeded_instance("row", "x", make).unwrap();
            tmp.id()
        };
        assert_eq!(reg.instance_count("row"), 0);
        let again = reg.get_seeded_instance("row", "x", make).unwrap();
        assert_ne!(again.id(), id);
    }

    #[test]
    fn type_mismatch_is_reported() {
        let exec = Executor::lab();
        let reg = registry(&exec);
        reg.get_singleton("shared", || Injection::value(|| 1u8)).unwrap();
        let err = reg
            .get_singleton("shared", || Injection::value(|| String::new()))
            .unwrap_err();
        assert!(matches!(
            err,
            StateError::TypeMismatch { ref key, .. } if key == "shared"
        ));
        assert!(reg.instances::<String>("shared").is_err());
    }

    #[test]
    fn add_seed_aliases_an_instance() {
        let exec = Executor::lab();
        let reg = registry(&exec);
        let make = || Injection::value(|| 0u8);
        let a = reg.get_seeded_instance("tile", "a", make).unwrap();
        assert!(reg.add_seed("tile", &a, "alias").unwrap());
        let via_alias = reg.get_seeded_instance("tile", "alias", make).unwrap();
        assert!(a.ptr_eq(&via_alias));
        assert_eq!(a.seeds().len(), 2);
        assert_eq!(reg.instance_count("tile"), 1);

        let single = reg.get_singleton("tile", make).unwrap();
        assert!(!reg.add_seed("tile", &single, "nope").unwrap());
    }

    #[test]
    fn instances_lists_live_containers() {
        let exec = Executor::lab();
        let reg = registry(&exec);
        let make = || Injection::value(|| 0u8);
        let a = reg.get_seeded_instance("cell", "a", make).unwrap();
        let _b = reg.get_seeded_instance("cell", "b", make).unwrap();
        let listed = reg.instances::<u8>("cell").unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].ptr_eq(&a));
        assert!(reg.instances::<u8>("absent").unwrap().is_empty());
    }

    #[test]
    fn remove_and_clear_forget_entities() {
        let exec = Executor::lab();
        let reg = registry(&exec);
        let first = reg.get_singleton("a", || Injection::value(|| 1u8)).unwrap();
        reg.get_singleton("b", || Injection::value(|| 2u8)).unwrap();

        assert!(reg.remove("a"));
        assert!(!reg.contains("a"));
        let fresh = reg.get_singleton("a", || Injection::value(|| 3u8)).unwrap();
        assert!(!first.ptr_eq(&fresh));
        assert_eq!(fresh.value(), Some(3));

        reg.clear();
        assert!(reg.is_empty());
    }

    #[test]
    fn containers_share_the_registry_observers() {
        let exec = Executor::lab();
        let reg = registry(&exec);
        let c = reg
            .get_singleton("n", || Injection::value(|| 0u8))
            .unwrap();
        let _sub = c.subscribe(|| {});
        assert_eq!(reg.observers().subscriber_count(c.id()), 1);
        c.mutate(|n| Ok::<_, BoxError>(n + 1), Default::default())
            .unwrap();
        assert_eq!(reg.observers().total_notifications(), 1);
    }
}
