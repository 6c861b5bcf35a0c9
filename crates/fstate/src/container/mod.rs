#![forbid(unsafe_code)]

//! Observable state containers.
//!
//! A [`StateContainer<T>`] owns one [`Snapshot<T>`] and replaces it on every
//! transition. Mutators run against the current value and return a
//! [`Mutation`]: an immediate value or failure settles within the call, a
//! future or stream moves the container to `Waiting` and settles later on the
//! executor that created it.
//!
//! # Invariants
//!
//! 1. Every transition swaps in a whole new snapshot and bumps `version()`.
//! 2. A transition notifies subscribers at most once, after the swap, so a
//!    callback reading the container sees the new snapshot.
//! 3. Settles apply in completion order. A later `mutate()` does not cancel
//!    an earlier delayed one; the last to settle wins.
//! 4. Delayed failures are always captured. Only a synchronous failure with
//!    catching disabled crosses the `mutate()` boundary.
//! 5. A watch compares settled data with the value the mutator ran against
//!    (for streams, the previous emission), never with a `Waiting`
//!    placeholder.
//!
//! # Failure Modes
//!
//! - `mutate()` on a container backed by a one-shot future returns
//!   [`StateError::UnsupportedMutation`]; `refresh()` is the way to re-run it.
//! - Subscriber callbacks that capture a strong clone of the container they
//!   observe form a reference cycle. Capture [`StateContainer::downgrade`].

mod history;
pub mod mutation;
pub mod source;

pub use mutation::{CallJoin, MutateOptions, Mutation, Watch};
pub use source::{Injection, Source, SourceKind};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use futures::future::LocalBoxFuture;
use futures::stream::LocalBoxStream;
use futures::{FutureExt, StreamExt};
use tracing::{debug, trace, warn};

use self::history::History;
use crate::config::StateConfig;
use crate::error::{BoxError, CapturedError, Result, StateError};
use crate::executor::Spawner;
use crate::observer::{
    ContainerId, ObserverHandle, ObserverRegistry, Subscription, Tag, TagFilter,
};
use crate::registry::{EntityKey, JoinTarget, Seed};
use crate::snapshot::{Snapshot, Status, WhenStatus};

/// How a container relates to its logical entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerRole {
    /// Built directly, outside any registry.
    Standalone,
    /// The one shared container for a registry key.
    Singleton,
    /// A seeded copy of a registry entity.
    Instance,
}

/// Services a container needs from whoever created it.
#[derive(Clone)]
pub(crate) struct Context {
    pub(crate) spawner: Spawner,
    pub(crate) observers: Rc<ObserverRegistry>,
    pub(crate) config: StateConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// A `mutate()` call.
    Mutation,
    /// The container's own creator, at construction or on refresh.
    Source,
    /// Undo or redo.
    History,
    /// Written by a join from another container.
    Join,
}

enum Pending<T> {
    Future(LocalBoxFuture<'static, std::result::Result<T, BoxError>>),
    Stream(LocalBoxStream<'static, std::result::Result<T, BoxError>>),
}

struct Inner<T> {
    id: ContainerId,
    key: EntityKey,
    role: ContainerRole,
    seeds: RefCell<Vec<Seed>>,
    snapshot: RefCell<Rc<Snapshot<T>>>,
    injection: Injection<T>,
    kind: Cell<SourceKind>,
    ctx: Context,
    history: RefCell<History<T>>,
    link: RefCell<Option<Weak<dyn JoinTarget<T>>>>,
    joined_value: RefCell<Option<T>>,
    version: Cell<u64>,
    notified_total: Cell<u64>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        self.ctx.observers.clear(self.id);
        // a disposed instance already took its link
        if self.role == ContainerRole::Instance
            && let Some(target) = self.link.get_mut().take().and_then(|link| link.upgrade())
        {
            target.released(self.id);
        }
    }
}

/// Shared handle to a reactive value with a computation status.
///
/// Clones refer to the same container.
///
/// ```
/// use fstate::{Executor, Injection, MutateOptions, StateContainer};
///
/// let exec = Executor::lab();
/// let counter = StateContainer::builder("counter")
///     .source(Injection::value(|| 0))
///     .build(&exec.spawner())
///     .unwrap();
///
/// counter
///     .mutate(|n| Ok::<_, &str>(n + 1), MutateOptions::new())
///     .unwrap();
/// assert_eq!(counter.value(), Some(1));
/// ```
pub struct StateContainer<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for StateContainer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for StateContainer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.inner.snapshot.borrow();
        f.debug_struct("StateContainer")
            .field("id", &self.inner.id)
            .field("key", &self.inner.key)
            .field("role", &self.inner.role)
            .field("status", &snapshot.status())
            .field("done", &snapshot.is_done())
            .field("version", &self.inner.version.get())
            .finish()
    }
}

impl<T: Clone + 'static> StateContainer<T> {
    #[must_use]
    pub fn builder(key: impl Into<EntityKey>) -> ContainerBuilder<T> {
        ContainerBuilder::new(key)
    }

    pub(crate) fn create(
        key: EntityKey,
        role: ContainerRole,
        seeds: Vec<Seed>,
        injection: Injection<T>,
        ctx: Context,
    ) -> Self {
        let source = injection.create();
        let kind = source.kind();
        let (initial, pending) = match source {
            Source::Empty => (Snapshot::idle(None), None),
            Source::Value(value) => (Snapshot::data(value), None),
            Source::Future(future) => (Snapshot::waiting(None), Some(Pending::Future(future))),
            Source::Stream { initial, stream } => {
                (Snapshot::waiting(initial), Some(Pending::Stream(stream)))
            }
        };
        let initial = Rc::new(initial);
        let limit = injection
            .undo_stack_length
            .unwrap_or(ctx.config.undo_stack_length);
        let mut history = History::new(limit);
        if initial.has_data() {
            history.record(Rc::clone(&initial));
        }

        let container = Self {
            inner: Rc::new(Inner {
                id: ContainerId::next(),
                key,
                role,
                seeds: RefCell::new(seeds),
                snapshot: RefCell::new(initial),
                injection,
                kind: Cell::new(kind),
                ctx,
                history: RefCell::new(history),
                link: RefCell::new(None),
                joined_value: RefCell::new(None),
                version: Cell::new(0),
                notified_total: Cell::new(0),
            }),
        };
        debug!(
            container = %container.inner.id,
            key = %container.name(),
            role = ?role,
            source = ?kind,
            "container created"
        );
        if let Some(pending) = pending {
            container.spawn(pending, MutateOptions::default(), Origin::Source, None);
        }
        container
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Run `mutator` against the last known value and apply its outcome.
    ///
    /// # Errors
    ///
    /// - [`StateError::UnsupportedMutation`] if the container is backed by a
    ///   one-shot future.
    /// - [`StateError::Uninitialized`] if there is no value yet.
    /// - [`StateError::Mutation`] if the mutator failed synchronously and
    ///   catching is off. The failure is already stored and notified.
    pub fn mutate<F, M>(&self, mutator: F, options: MutateOptions<T>) -> Result<()>
    where
        F: FnOnce(&T) -> M,
        M: Into<Mutation<T>>,
    {
        self.ensure_mutable()?;
        let snapshot = self.snapshot();
        let Some(current) = snapshot.value() else {
            warn!(
                container = %self.inner.id,
                key = %self.name(),
                "mutate on a container with no value"
            );
            return Err(StateError::Uninitialized {
                key: self.name().to_owned(),
            });
        };
        let mutation = mutator(current).into();
        self.apply(mutation, options, snapshot.data_value())
    }

    /// Like [`mutate`](Self::mutate), but also runs on an empty container.
    ///
    /// # Errors
    ///
    /// As `mutate`, minus [`StateError::Uninitialized`].
    pub fn mutate_with<F, M>(&self, mutator: F, options: MutateOptions<T>) -> Result<()>
    where
        F: FnOnce(Option<&T>) -> M,
        M: Into<Mutation<T>>,
    {
        self.ensure_mutable()?;
        let snapshot = self.snapshot();
        let mutation = mutator(snapshot.value()).into();
        self.apply(mutation, options, snapshot.data_value())
    }

    /// Replace the value.
    ///
    /// # Errors
    ///
    /// [`StateError::UnsupportedMutation`] on a future-backed container.
    pub fn set(&self, value: T) -> Result<()> {
        self.ensure_mutable()?;
        let before = self.snapshot();
        self.apply(
            Mutation::Value(value),
            MutateOptions::default(),
            before.data_value(),
        )
    }

    /// Move to `Error`, keeping the last known value. Never re-raised.
    ///
    /// # Errors
    ///
    /// [`StateError::UnsupportedMutation`] on a future-backed container.
    pub fn set_error(&self, error: impl Into<BoxError>) -> Result<()> {
        self.ensure_mutable()?;
        self.apply(
            Mutation::Fail(error.into()),
            MutateOptions::default().catch_error(true),
            None,
        )
    }

    /// Re-run the container's creator through the usual state machine.
    pub fn refresh(&self) {
        let before = self.snapshot();
        let baseline = before.data_value();
        let source = self.inner.injection.create();
        self.inner.kind.set(source.kind());
        debug!(
            container = %self.inner.id,
            key = %self.name(),
            source = ?source.kind(),
            "refresh"
        );
        let options = MutateOptions::default();
        match source {
            Source::Empty => {
                self.transition(Rc::new(Snapshot::idle(None)), &options, Origin::Source, None);
            }
            Source::Value(value) => {
                let next = Rc::new(Snapshot::data(value));
                self.transition(next, &options, Origin::Source, baseline);
            }
            Source::Future(future) => {
                self.begin_waiting(None, &options, Origin::Source);
                self.spawn(Pending::Future(future), options, Origin::Source, baseline.cloned());
            }
            Source::Stream { initial, stream } => {
                self.begin_waiting(initial, &options, Origin::Source);
                self.spawn(Pending::Stream(stream), options, Origin::Source, baseline.cloned());
            }
        }
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.inner.kind.get().is_one_shot() {
            warn!(
                container = %self.inner.id,
                key = %self.name(),
                "mutate on a one-shot future source"
            );
            return Err(StateError::UnsupportedMutation {
                key: self.name().to_owned(),
            });
        }
        Ok(())
    }

    /// `baseline` is the data value the mutator ran against. Watches compare
    /// every settled value with it.
    fn apply(
        &self,
        mutation: Mutation<T>,
        options: MutateOptions<T>,
        baseline: Option<&T>,
    ) -> Result<()> {
        match mutation {
            Mutation::Value(value) => {
                let next = Rc::new(Snapshot::data(value));
                self.transition(next, &options, Origin::Mutation, baseline);
                Ok(())
            }
            Mutation::Fail(error) => {
                let captured = CapturedError::new(error);
                let next = Snapshot::failed(captured.clone(), self.value());
                self.transition(Rc::new(next), &options, Origin::Mutation, None);
                let catch = options
                    .catch_error
                    .unwrap_or(self.inner.ctx.config.default_catch_error);
                if catch {
                    return Ok(());
                }
                warn!(
                    container = %self.inner.id,
                    key = %self.name(),
                    error = %captured,
                    "uncaught mutation failure"
                );
                Err(StateError::Mutation {
                    key: self.name().to_owned(),
                    source: captured,
                })
            }
            Mutation::Future(future) => {
                self.begin_waiting(None, &options, Origin::Mutation);
                let baseline = baseline.cloned();
                self.spawn(Pending::Future(future), options, Origin::Mutation, baseline);
                Ok(())
            }
            Mutation::Stream(stream) => {
                self.begin_waiting(None, &options, Origin::Mutation);
                let baseline = baseline.cloned();
                self.spawn(Pending::Stream(stream), options, Origin::Mutation, baseline);
                Ok(())
            }
        }
    }

    fn begin_waiting(&self, placeholder: Option<T>, options: &MutateOptions<T>, origin: Origin) {
        let previous = placeholder.or_else(|| self.value());
        self.transition(Rc::new(Snapshot::waiting(previous)), options, origin, None);
    }

    /// A stream compares each emission with the one before it, starting
    /// from `baseline`. An error emission clears the comparison.
    fn spawn(
        &self,
        pending: Pending<T>,
        options: MutateOptions<T>,
        origin: Origin,
        baseline: Option<T>,
    ) {
        let this = self.clone();
        let opts = options.clone();
        let task = match pending {
            Pending::Future(future) => async move {
                let outcome = future.await;
                this.settle(outcome, &opts, origin, baseline.as_ref());
            }
            .boxed_local(),
            Pending::Stream(mut stream) => async move {
                let mut last = baseline;
                while let Some(item) = stream.next().await {
                    let emitted = item.as_ref().ok().cloned();
                    this.settle(item, &opts, origin, last.as_ref());
                    last = emitted;
                }
                this.finish_stream(&opts);
            }
            .boxed_local(),
        };
        if let Err(error) = self.inner.ctx.spawner.spawn(task) {
            warn!(
                container = %self.inner.id,
                key = %self.name(),
                %error,
                "failed to spawn delayed mutation"
            );
            self.settle(Err(error.into()), &options, origin, None);
        }
    }

    fn settle(
        &self,
        outcome: std::result::Result<T, BoxError>,
        options: &MutateOptions<T>,
        origin: Origin,
        baseline: Option<&T>,
    ) {
        let next = match outcome {
            Ok(value) => Snapshot::data(value),
            Err(error) => Snapshot::failed(CapturedError::new(error), self.value()),
        };
        // leaving an error state always notifies
        let baseline = baseline.filter(|_| !self.has_error());
        self.transition(Rc::new(next), options, origin, baseline);
    }

    fn finish_stream(&self, options: &MutateOptions<T>) {
        let drained = (*self.snapshot()).clone().with_done(true);
        self.inner.snapshot.replace(Rc::new(drained));
        self.bump();
        let notified = self.rebuild(options);
        debug!(
            container = %self.inner.id,
            key = %self.name(),
            notified,
            "stream drained"
        );
    }

    fn transition(
        &self,
        next: Rc<Snapshot<T>>,
        options: &MutateOptions<T>,
        origin: Origin,
        baseline: Option<&T>,
    ) -> usize {
        let watch = match origin {
            Origin::Mutation | Origin::Source => options
                .watch
                .as_ref()
                .or(self.inner.injection.watch.as_ref()),
            Origin::History | Origin::Join => None,
        };
        let suppressed = watch.is_some_and(|w| w.suppresses(baseline, &next));

        let previous = self.inner.snapshot.replace(Rc::clone(&next));
        self.bump();
        let notified = if suppressed { 0 } else { self.rebuild(options) };

        if self.inner.ctx.config.trace_transitions {
            trace!(
                container = %self.inner.id,
                key = %self.name(),
                from = %previous.status(),
                to = %next.status(),
                notified,
                suppressed,
                "state transition"
            );
        }

        if let Some(value) = next.data_value() {
            if let Some(hook) = &options.on_data {
                hook(value);
            }
            if origin != Origin::History {
                self.inner.history.borrow_mut().record(Rc::clone(&next));
            }
        } else if let Some(error) = next.error()
            && let Some(hook) = &options.on_error
        {
            hook(error);
        }

        if origin != Origin::Join {
            self.propagate(&options.join);
        }
        notified
    }

    fn rebuild(&self, options: &MutateOptions<T>) -> usize {
        if let Some(hook) = &options.on_before_rebuild {
            hook(self);
        }
        let notified = self.notify(&options.filter);
        if let Some(hook) = &options.on_after_rebuild {
            hook(self);
        }
        notified
    }

    fn propagate(&self, join: &CallJoin<T>) {
        let target = self.inner.link.borrow().as_ref().and_then(Weak::upgrade);
        if let Some(target) = target {
            target.after_transition(self, join);
        }
    }

    fn bump(&self) {
        self.inner.version.set(self.inner.version.get() + 1);
    }

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    /// Restore the previous data snapshot. Returns `false` if there is none.
    ///
    /// From a waiting, error or idle snapshot the latest data snapshot is
    /// restored first.
    pub fn undo(&self) -> bool {
        let entry = if self.has_data() {
            self.inner.history.borrow_mut().undo()
        } else {
            self.inner.history.borrow().current()
        };
        let Some(snapshot) = entry else {
            return false;
        };
        self.transition(snapshot, &MutateOptions::default(), Origin::History, None);
        true
    }

    /// Re-apply a snapshot removed by [`undo`](Self::undo).
    pub fn redo(&self) -> bool {
        let entry = self.inner.history.borrow_mut().redo();
        let Some(snapshot) = entry else {
            return false;
        };
        self.transition(snapshot, &MutateOptions::default(), Origin::History, None);
        true
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        let history = self.inner.history.borrow();
        if self.has_data() {
            history.can_undo()
        } else {
            history.current().is_some()
        }
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.inner.history.borrow().can_redo()
    }

    pub fn clear_history(&self) {
        self.inner.history.borrow_mut().clear();
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Reset to an empty idle snapshot and drop subscribers and history.
    ///
    /// An instance is also removed from its registry's lookup. Delayed work
    /// already in flight still settles into the container.
    pub fn dispose(&self) {
        self.inner.snapshot.replace(Rc::new(Snapshot::idle(None)));
        self.bump();
        let subscribers = self.inner.ctx.observers.clear(self.inner.id);
        self.inner.history.borrow_mut().reset();
        self.inner.joined_value.replace(None);
        if self.inner.role == ContainerRole::Instance {
            let link = self.inner.link.borrow_mut().take();
            if let Some(target) = link.as_ref().and_then(Weak::upgrade) {
                target.detach(self);
            }
        }
        debug!(
            container = %self.inner.id,
            key = %self.name(),
            subscribers,
            "container disposed"
        );
    }

    // -------------------------------------------------------------------------
    // Joining (registry side)
    // -------------------------------------------------------------------------

    pub(crate) fn attach(&self, target: Weak<dyn JoinTarget<T>>) {
        self.inner.link.replace(Some(target));
    }

    pub(crate) fn unlink(&self) {
        self.inner.link.replace(None);
    }

    pub(crate) fn add_seed(&self, seed: Seed) {
        let mut seeds = self.inner.seeds.borrow_mut();
        if !seeds.contains(&seed) {
            seeds.push(seed);
        }
    }

    pub(crate) fn remove_seed(&self, seed: &Seed) {
        self.inner.seeds.borrow_mut().retain(|s| s != seed);
    }

    /// Overwrite the snapshot on behalf of another container. Does not feed
    /// back into joins.
    pub(crate) fn apply_join(&self, next: Snapshot<T>, joined: Option<T>) -> usize {
        if joined.is_some() {
            self.inner.joined_value.replace(joined);
        }
        self.transition(Rc::new(next), &MutateOptions::default(), Origin::Join, None)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// The last known value, whatever the status.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.inner.snapshot.borrow().value().cloned()
    }

    #[must_use]
    pub fn joined_value(&self) -> Option<T> {
        self.inner.joined_value.borrow().clone()
    }
}

impl<T> StateContainer<T> {
    // -------------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------------

    /// Register an untagged callback. Dropping the guard unsubscribes.
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Subscription {
        self.subscribe_as(ObserverHandle::next(), None, callback)
    }

    /// Register a callback that only filtered notifications naming `tag`
    /// (or unfiltered ones) reach.
    pub fn subscribe_tagged(
        &self,
        tag: impl Into<Tag>,
        callback: impl Fn() + 'static,
    ) -> Subscription {
        self.subscribe_as(ObserverHandle::next(), Some(tag.into()), callback)
    }

    /// Register under a caller-owned handle. Re-registering a handle
    /// replaces its callback.
    pub fn subscribe_as(
        &self,
        handle: ObserverHandle,
        tag: Option<Tag>,
        callback: impl Fn() + 'static,
    ) -> Subscription {
        let observers = &self.inner.ctx.observers;
        observers.subscribe(self.inner.id, handle, tag, callback);
        Subscription::new(observers, self.inner.id, handle)
    }

    pub fn unsubscribe(&self, handle: ObserverHandle) -> bool {
        self.inner.ctx.observers.unsubscribe(self.inner.id, handle)
    }

    /// Run a notification pass without changing the snapshot.
    pub fn notify(&self, filter: &TagFilter) -> usize {
        let notified = self.inner.ctx.observers.notify(self.inner.id, filter);
        self.inner
            .notified_total
            .set(self.inner.notified_total.get() + notified as u64);
        notified
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.ctx.observers.subscriber_count(self.inner.id)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn id(&self) -> ContainerId {
        self.inner.id
    }

    #[must_use]
    pub fn key(&self) -> &EntityKey {
        &self.inner.key
    }

    /// Debug name if the injection set one, otherwise the key.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner
            .injection
            .name
            .as_deref()
            .unwrap_or_else(|| self.inner.key.as_str())
    }

    #[must_use]
    pub fn role(&self) -> ContainerRole {
        self.inner.role
    }

    #[must_use]
    pub fn is_new_instance(&self) -> bool {
        self.inner.role == ContainerRole::Instance
    }

    #[must_use]
    pub fn seeds(&self) -> Vec<Seed> {
        self.inner.seeds.borrow().clone()
    }

    #[must_use]
    pub fn source_kind(&self) -> SourceKind {
        self.inner.kind.get()
    }

    #[must_use]
    pub fn snapshot(&self) -> Rc<Snapshot<T>> {
        Rc::clone(&*self.inner.snapshot.borrow())
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.snapshot.borrow().status()
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.snapshot.borrow().is_idle()
    }

    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.inner.snapshot.borrow().is_waiting()
    }

    #[must_use]
    pub fn has_data(&self) -> bool {
        self.inner.snapshot.borrow().has_data()
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.inner.snapshot.borrow().has_error()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.snapshot.borrow().is_done()
    }

    #[must_use]
    pub fn error(&self) -> Option<CapturedError> {
        self.inner.snapshot.borrow().error().cloned()
    }

    /// Borrow the last known value without cloning it.
    pub fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let snapshot = self.snapshot();
        snapshot.value().map(f)
    }

    /// Dispatch on the current status. Exactly one branch runs.
    pub fn when_status<R, I, W, D, E>(&self, branches: WhenStatus<I, W, D, E>) -> R
    where
        I: FnOnce(Option<&T>) -> R,
        W: FnOnce(Option<&T>) -> R,
        D: FnOnce(&T) -> R,
        E: FnOnce(&CapturedError) -> R,
    {
        self.snapshot().when(branches)
    }

    /// Number of transitions applied so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Callbacks invoked by this container's notification passes.
    #[must_use]
    pub fn notified_total(&self) -> u64 {
        self.inner.notified_total.get()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakContainer<T> {
        WeakContainer {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

/// Non-owning handle to a [`StateContainer`].
pub struct WeakContainer<T> {
    inner: Weak<Inner<T>>,
}

impl<T> Clone for WeakContainer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for WeakContainer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakContainer")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl<T> WeakContainer<T> {
    #[must_use]
    pub fn upgrade(&self) -> Option<StateContainer<T>> {
        self.inner.upgrade().map(|inner| StateContainer { inner })
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

/// Builder for a container that lives outside any registry.
pub struct ContainerBuilder<T> {
    key: EntityKey,
    injection: Option<Injection<T>>,
    observers: Option<Rc<ObserverRegistry>>,
    config: StateConfig,
}

impl<T> fmt::Debug for ContainerBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerBuilder")
            .field("key", &self.key)
            .field("injection", &self.injection)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: Clone + 'static> ContainerBuilder<T> {
    #[must_use]
    pub fn new(key: impl Into<EntityKey>) -> Self {
        Self {
            key: key.into(),
            injection: None,
            observers: None,
            config: StateConfig::default(),
        }
    }

    #[must_use]
    pub fn source(mut self, injection: Injection<T>) -> Self {
        self.injection = Some(injection);
        self
    }

    /// Share an observer registry with other containers.
    #[must_use]
    pub fn observers(mut self, observers: Rc<ObserverRegistry>) -> Self {
        self.observers = Some(observers);
        self
    }

    #[must_use]
    pub fn config(mut self, config: StateConfig) -> Self {
        self.config = config;
        self
    }

    /// # Errors
    ///
    /// [`StateError::MissingSource`] if no source was given.
    pub fn build(self, spawner: &Spawner) -> Result<StateContainer<T>> {
        let Some(injection) = self.injection else {
            warn!(key = %self.key, "container built without a source");
            return Err(StateError::MissingSource {
                key: self.key.to_string(),
            });
        };
        let ctx = Context {
            spawner: spawner.clone(),
            observers: self.observers.unwrap_or_default(),
            config: self.config,
        };
        Ok(StateContainer::create(
            self.key,
            ContainerRole::Standalone,
            Vec::new(),
            injection,
            ctx,
        ))
    }
}
