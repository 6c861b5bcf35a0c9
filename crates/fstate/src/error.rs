#![forbid(unsafe_code)]

//! Error types for state containers and the instance registry.
//!
//! Two kinds of failure exist and they never mix:
//!
//! - [`CapturedError`] is *data*: the error a mutator produced, stored in a
//!   [`Snapshot`](crate::Snapshot) and handed to observers.
//! - [`StateError`] is *control flow*: returned from an API call. Only
//!   construction faults, unsupported operations, and uncaught synchronous
//!   mutation faults cross a call boundary.

use std::fmt;
use std::rc::Rc;

use thiserror::Error;

/// Error type mutators and value sources may fail with.
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// Result alias for fallible container and registry operations.
pub type Result<T> = std::result::Result<T, StateError>;

/// An error captured from a mutator or delayed source.
///
/// Cheap to clone (`Rc` inside); every snapshot and hook that observes the
/// same failure shares one allocation.
#[derive(Clone)]
pub struct CapturedError {
    inner: Rc<dyn std::error::Error + 'static>,
}

impl CapturedError {
    /// Capture anything convertible into a boxed error (`&str`, `String`,
    /// or any `std::error::Error`).
    pub fn new(error: impl Into<BoxError>) -> Self {
        let boxed: BoxError = error.into();
        Self {
            inner: Rc::from(boxed),
        }
    }

    /// The rendered error message.
    #[must_use]
    pub fn message(&self) -> String {
        self.inner.to_string()
    }

    /// The original error.
    #[must_use]
    pub fn inner(&self) -> &(dyn std::error::Error + 'static) {
        &*self.inner
    }

    /// Downcast the original error to a concrete type.
    #[must_use]
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Whether both handles point at the same captured failure.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CapturedError")
            .field(&self.message())
            .finish()
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

impl std::error::Error for CapturedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl PartialEq for CapturedError {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.message() == other.message()
    }
}

/// Errors returned by container and registry operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// A synchronous mutator failed and the call did not opt in to catching.
    ///
    /// The failure is also stored in the container's snapshot and observers
    /// have already been notified when this is returned.
    #[error("mutation of `{key}` failed: {source}")]
    Mutation {
        key: String,
        #[source]
        source: CapturedError,
    },

    /// The container is backed by a one-shot future and cannot be mutated.
    #[error("`{key}` is backed by a one-shot future; use refresh() to re-run it")]
    UnsupportedMutation { key: String },

    /// A container was built without a value source.
    #[error("`{key}` has no value source")]
    MissingSource { key: String },

    /// A registry entry was requested with a different value type.
    #[error("`{key}` was registered with a different value type (requested `{expected}`)")]
    TypeMismatch { key: String, expected: &'static str },

    /// A value-reading mutator ran against a container with no value yet.
    #[error("`{key}` has no value yet; use mutate_with() to seed it")]
    Uninitialized { key: String },
}

impl StateError {
    /// The captured mutator error, for [`StateError::Mutation`].
    #[must_use]
    pub fn captured(&self) -> Option<&CapturedError> {
        match self {
            Self::Mutation { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Key of the container or entity the error concerns.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Mutation { key, .. }
            | Self::UnsupportedMutation { key }
            | Self::MissingSource { key }
            | Self::TypeMismatch { key, .. }
            | Self::Uninitialized { key } => key,
        }
    }
}
