#![forbid(unsafe_code)]

//! Value sources and the injection recipe a container is built from.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::stream::{LocalBoxStream, Stream};
use futures::{FutureExt, StreamExt};

use super::mutation::Watch;
use crate::error::BoxError;
use crate::registry::JoinPolicy;

/// Where a container's value comes from.
pub enum Source<T> {
    /// No value; the container starts idle.
    Empty,
    /// A value available immediately.
    Value(T),
    /// A single delayed value.
    Future(LocalBoxFuture<'static, Result<T, BoxError>>),
    /// A sequence of delayed values, with an optional placeholder shown
    /// while the first one is pending.
    Stream {
        initial: Option<T>,
        stream: LocalBoxStream<'static, Result<T, BoxError>>,
    },
}

impl<T: 'static> Source<T> {
    pub fn future<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + 'static,
        E: Into<BoxError>,
    {
        Self::Future(async move { future.await.map_err(Into::into) }.boxed_local())
    }

    pub fn stream<S, E>(initial: Option<T>, stream: S) -> Self
    where
        S: Stream<Item = Result<T, E>> + 'static,
        E: Into<BoxError>,
    {
        Self::Stream {
            initial,
            stream: stream.map(|item| item.map_err(Into::into)).boxed_local(),
        }
    }
}

impl<T> Source<T> {
    #[must_use]
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Empty => SourceKind::Empty,
            Self::Value(_) => SourceKind::Value,
            Self::Future(_) => SourceKind::Future,
            Self::Stream { .. } => SourceKind::Stream,
        }
    }
}

impl<T> fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Source").field(&self.kind()).finish()
    }
}

/// Shape of a [`Source`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Empty,
    Value,
    Future,
    Stream,
}

impl SourceKind {
    /// One-shot sources cannot be mutated; only refreshed.
    #[must_use]
    pub const fn is_one_shot(self) -> bool {
        matches!(self, Self::Future)
    }
}

/// Recipe for building containers of one logical entity.
///
/// Holds a re-invocable creator (run once per container, and again on
/// `refresh()`), the entity-level [`JoinPolicy`], and per-entity options.
pub struct Injection<T> {
    pub(crate) creator: Rc<dyn Fn() -> Source<T>>,
    pub(crate) policy: JoinPolicy,
    pub(crate) name: Option<Cow<'static, str>>,
    pub(crate) watch: Option<Watch<T>>,
    pub(crate) undo_stack_length: Option<usize>,
}

impl<T> Clone for Injection<T> {
    fn clone(&self) -> Self {
        Self {
            creator: Rc::clone(&self.creator),
            policy: self.policy,
            name: self.name.clone(),
            watch: self.watch.clone(),
            undo_stack_length: self.undo_stack_length,
        }
    }
}

impl<T> fmt::Debug for Injection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injection")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("watch", &self.watch.is_some())
            .field("undo_stack_length", &self.undo_stack_length)
            .finish()
    }
}

impl<T: 'static> Injection<T> {
    pub fn new(creator: impl Fn() -> Source<T> + 'static) -> Self {
        Self {
            creator: Rc::new(creator),
            policy: JoinPolicy::None,
            name: None,
            watch: None,
            undo_stack_length: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(|| Source::Empty)
    }

    pub fn value(create: impl Fn() -> T + 'static) -> Self {
        Self::new(move || Source::Value(create()))
    }

    pub fn future<F, Fut, E>(create: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        E: Into<BoxError>,
    {
        Self::new(move || Source::future(create()))
    }

    pub fn stream<F, S, E>(initial: Option<T>, create: F) -> Self
    where
        T: Clone,
        F: Fn() -> S + 'static,
        S: Stream<Item = Result<T, E>> + 'static,
        E: Into<BoxError>,
    {
        Self::new(move || Source::stream(initial.clone(), create()))
    }

    #[must_use]
    pub fn join_policy(mut self, policy: JoinPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Name used in logs and errors instead of the registry key.
    #[must_use]
    pub fn debug_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Suppress source-driven notifications (stream emissions, refreshes)
    /// whose projection did not change.
    #[must_use]
    pub fn watch<K, P>(mut self, project: P) -> Self
    where
        K: PartialEq + 'static,
        P: Fn(&T) -> K + 'static,
    {
        self.watch = Some(Watch::new(project));
        self
    }

    /// Override the configured undo history length for this entity.
    #[must_use]
    pub fn undo_stack_length(mut self, length: usize) -> Self {
        self.undo_stack_length = Some(length);
        self
    }
}

impl<T> Injection<T> {
    #[must_use]
    pub fn policy(&self) -> JoinPolicy {
        self.policy
    }

    pub(crate) fn create(&self) -> Source<T> {
        (self.creator)()
    }
}
