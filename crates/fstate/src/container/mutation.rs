#![forbid(unsafe_code)]

//! What a mutator returns and how a single `mutate()` call is configured.

use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::stream::{LocalBoxStream, Stream};
use futures::{FutureExt, StreamExt};

use super::StateContainer;
use crate::error::{BoxError, CapturedError};
use crate::observer::{Tag, TagFilter};
use crate::registry::Seed;
use crate::snapshot::Snapshot;

/// The outcome of running a mutator against the current value.
///
/// `Result<T, E>` converts into `Value` / `Fail`, so a synchronous mutator
/// can simply return `Ok(next)`.
pub enum Mutation<T> {
    /// Settled synchronously with a new value.
    Value(T),
    /// Failed synchronously.
    Fail(BoxError),
    /// Settles once, later.
    Future(LocalBoxFuture<'static, Result<T, BoxError>>),
    /// Settles once per emitted item, later.
    Stream(LocalBoxStream<'static, Result<T, BoxError>>),
}

impl<T: 'static> Mutation<T> {
    pub fn value(value: T) -> Self {
        Self::Value(value)
    }

    pub fn fail(error: impl Into<BoxError>) -> Self {
        Self::Fail(error.into())
    }

    pub fn future<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + 'static,
        E: Into<BoxError>,
    {
        Self::Future(async move { future.await.map_err(Into::into) }.boxed_local())
    }

    pub fn stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, E>> + 'static,
        E: Into<BoxError>,
    {
        Self::Stream(stream.map(|item| item.map_err(Into::into)).boxed_local())
    }

    /// Whether settling happens after `mutate()` returns.
    #[must_use]
    pub fn is_delayed(&self) -> bool {
        matches!(self, Self::Future(_) | Self::Stream(_))
    }
}

impl<T, E: Into<BoxError>> From<Result<T, E>> for Mutation<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Value(value),
            Err(error) => Self::Fail(error.into()),
        }
    }
}

impl<T> fmt::Debug for Mutation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Value(_) => "Value",
            Self::Fail(_) => "Fail",
            Self::Future(_) => "Future",
            Self::Stream(_) => "Stream",
        };
        f.debug_tuple("Mutation").field(&kind).finish()
    }
}

/// Projection used to skip notifications when nothing relevant changed.
///
/// Two data values are "unchanged" when their projections compare equal.
pub struct Watch<T> {
    changed: Rc<dyn Fn(&T, &T) -> bool>,
}

impl<T> Clone for Watch<T> {
    fn clone(&self) -> Self {
        Self {
            changed: Rc::clone(&self.changed),
        }
    }
}

impl<T> fmt::Debug for Watch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Watch(..)")
    }
}

impl<T: 'static> Watch<T> {
    pub fn new<K, P>(project: P) -> Self
    where
        K: PartialEq + 'static,
        P: Fn(&T) -> K + 'static,
    {
        Self {
            changed: Rc::new(move |old: &T, new: &T| project(old) != project(new)),
        }
    }
}

impl<T> Watch<T> {
    #[must_use]
    pub fn changed(&self, old: &T, new: &T) -> bool {
        (self.changed)(old, new)
    }

    /// `next` is data whose projection equals the one of `baseline`, the
    /// data value the mutation started from. Without a baseline nothing is
    /// suppressed.
    pub(crate) fn suppresses(&self, baseline: Option<&T>, next: &Snapshot<T>) -> bool {
        match (baseline, next.data_value()) {
            (Some(old), Some(new)) => !self.changed(old, new),
            _ => false,
        }
    }
}

pub(crate) type ContainerHook<T> = Rc<dyn Fn(&StateContainer<T>)>;

/// Per-call joining requests, independent of the entity's [`JoinPolicy`].
///
/// [`JoinPolicy`]: crate::JoinPolicy
pub struct CallJoin<T> {
    pub(crate) join_singleton: bool,
    pub(crate) derive: Option<Rc<dyn Fn(&T) -> T>>,
    pub(crate) notify_all_instances: bool,
    pub(crate) seeds: Vec<Seed>,
}

impl<T> Default for CallJoin<T> {
    fn default() -> Self {
        Self {
            join_singleton: false,
            derive: None,
            notify_all_instances: false,
            seeds: Vec::new(),
        }
    }
}

impl<T> Clone for CallJoin<T> {
    fn clone(&self) -> Self {
        Self {
            join_singleton: self.join_singleton,
            derive: self.derive.clone(),
            notify_all_instances: self.notify_all_instances,
            seeds: self.seeds.clone(),
        }
    }
}

impl<T> fmt::Debug for CallJoin<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallJoin")
            .field("join_singleton", &self.join_singleton)
            .field("derive", &self.derive.is_some())
            .field("notify_all_instances", &self.notify_all_instances)
            .field("seeds", &self.seeds)
            .finish()
    }
}

impl<T> CallJoin<T> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.join_singleton && !self.notify_all_instances && self.seeds.is_empty()
    }

    #[must_use]
    pub fn joins_singleton(&self) -> bool {
        self.join_singleton
    }

    #[must_use]
    pub fn notifies_all_instances(&self) -> bool {
        self.notify_all_instances
    }

    #[must_use]
    pub fn seeds(&self) -> &[Seed] {
        &self.seeds
    }
}

/// Options for one `mutate()` call. Every field is optional.
///
/// ```
/// use fstate::MutateOptions;
///
/// let opts = MutateOptions::<Vec<u32>>::new()
///     .catch_error(true)
///     .watch(|items| items.len())
///     .tag("summary")
///     .on_error(|e| eprintln!("save failed: {e}"));
/// assert!(opts.catches_errors() == Some(true));
/// ```
pub struct MutateOptions<T> {
    pub(crate) catch_error: Option<bool>,
    pub(crate) watch: Option<Watch<T>>,
    pub(crate) filter: TagFilter,
    pub(crate) on_before_rebuild: Option<ContainerHook<T>>,
    pub(crate) on_after_rebuild: Option<ContainerHook<T>>,
    pub(crate) on_data: Option<Rc<dyn Fn(&T)>>,
    pub(crate) on_error: Option<Rc<dyn Fn(&CapturedError)>>,
    pub(crate) join: CallJoin<T>,
}

impl<T> Default for MutateOptions<T> {
    fn default() -> Self {
        Self {
            catch_error: None,
            watch: None,
            filter: TagFilter::all(),
            on_before_rebuild: None,
            on_after_rebuild: None,
            on_data: None,
            on_error: None,
            join: CallJoin::default(),
        }
    }
}

impl<T> Clone for MutateOptions<T> {
    fn clone(&self) -> Self {
        Self {
            catch_error: self.catch_error,
            watch: self.watch.clone(),
            filter: self.filter.clone(),
            on_before_rebuild: self.on_before_rebuild.clone(),
            on_after_rebuild: self.on_after_rebuild.clone(),
            on_data: self.on_data.clone(),
            on_error: self.on_error.clone(),
            join: self.join.clone(),
        }
    }
}

impl<T> fmt::Debug for MutateOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutateOptions")
            .field("catch_error", &self.catch_error)
            .field("watch", &self.watch.is_some())
            .field("filter", &self.filter)
            .field("join", &self.join)
            .finish_non_exhaustive()
    }
}

impl<T> MutateOptions<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture a synchronous failure instead of returning it from `mutate()`.
    ///
    /// Unset means "use the container's configured default".
    #[must_use]
    pub fn catch_error(mut self, catch: bool) -> Self {
        self.catch_error = Some(catch);
        self
    }

    #[must_use]
    pub fn catches_errors(&self) -> Option<bool> {
        self.catch_error
    }

    /// Restrict notification to subscribers under `tag` (and untagged ones).
    /// May be called repeatedly to admit several tags.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<Tag>) -> Self {
        self.filter.insert(tag);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: TagFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_watch(mut self, watch: Watch<T>) -> Self {
        self.watch = Some(watch);
        self
    }

    #[must_use]
    pub fn on_before_rebuild(mut self, hook: impl Fn(&StateContainer<T>) + 'static) -> Self {
        self.on_before_rebuild = Some(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn on_after_rebuild(mut self, hook: impl Fn(&StateContainer<T>) + 'static) -> Self {
        self.on_after_rebuild = Some(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn on_data(mut self, hook: impl Fn(&T) + 'static) -> Self {
        self.on_data = Some(Rc::new(hook));
        self
    }

    #[must_use]
    pub fn on_error(mut self, hook: impl Fn(&CapturedError) + 'static) -> Self {
        self.on_error = Some(Rc::new(hook));
        self
    }

    /// Overwrite the singleton with this call's outcome.
    #[must_use]
    pub fn join_singleton(mut self) -> Self {
        self.join.join_singleton = true;
        self
    }

    /// Overwrite the singleton with `derive(new_value)` instead of the value
    /// itself.
    #[must_use]
    pub fn join_singleton_with(mut self, derive: impl Fn(&T) -> T + 'static) -> Self {
        self.join.join_singleton = true;
        self.join.derive = Some(Rc::new(derive));
        self
    }

    /// Re-notify the singleton and every other cached instance afterwards.
    #[must_use]
    pub fn notify_all_instances(mut self) -> Self {
        self.join.notify_all_instances = true;
        self
    }

    /// Re-notify only instances cached under these seeds afterwards.
    #[must_use]
    pub fn seeds<I, S>(mut self, seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Seed>,
    {
        self.join.seeds.extend(seeds.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn join(&self) -> &CallJoin<T> {
        &self.join
    }

    #[must_use]
    pub fn tag_filter(&self) -> &TagFilter {
        &self.filter
    }
}

impl<T: 'static> MutateOptions<T> {
    /// Skip the notification when `project(new) == project(old)`.
    #[must_use]
    pub fn watch<K, P>(self, project: P) -> Self
    where
        K: PartialEq + 'static,
        P: Fn(&T) -> K + 'static,
    {
        self.with_watch(Watch::new(project))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_converts_into_mutation() {
        let ok: Mutation<i32> = Ok::<_, BoxError>(3).into();
        assert!(matches!(ok, Mutation::Value(3)));

        let err: Mutation<i32> = Err::<i32, _>("bad").into();
        match err {
            Mutation::Fail(e) => assert_eq!(e.to_string(), "bad"),
            other => panic!("expected Fail, got {other:?}"),
        }
    }

    #[test]
    fn delayed_kinds() {
        let fut = Mutation::future(async { Ok::<_, BoxError>(1) });
        let stream = Mutation::stream(futures::stream::iter(vec![Ok::<_, BoxError>(1)]));
        assert!(fut.is_delayed());
        assert!(stream.is_delayed());
        assert!(!Mutation::value(1).is_delayed());
    }

    #[test]
    fn watch_suppresses_only_data_matching_the_baseline() {
        let watch = Watch::new(|v: &(u8, char)| v.0);
        let a = Snapshot::data((1, 'a'));
        let b = Snapshot::data((1, 'b'));
        let c = Snapshot::data((2, 'a'));
        assert!(watch.suppresses(a.data_value(), &b));
        assert!(!watch.suppresses(a.data_value(), &c));
        assert!(!watch.suppresses(None, &b));
        assert!(!watch.suppresses(a.data_value(), &Snapshot::waiting(Some((1, 'a')))));
    }

    #[test]
    fn options_accumulate_tags_and_seeds() {
        let opts = MutateOptions::<u8>::new()
            .tag("a")
            .tag("b")
            .seeds(["left", "right"])
            .notify_all_instances();
        assert_eq!(opts.tag_filter().tags().len(), 2);
        assert_eq!(opts.join().seeds().len(), 2);
        assert!(opts.join().notifies_all_instances());
        assert!(!opts.join().joins_singleton());
        assert_eq!(opts.catches_errors(), None);
    }

    #[test]
    fn join_singleton_with_sets_flag() {
        let opts = MutateOptions::<u8>::new().join_singleton_with(|v| v * 2);
        assert!(opts.join().joins_singleton());
        assert!(!opts.join().is_empty());
        assert!(MutateOptions::<u8>::new().join().is_empty());
    }
}
