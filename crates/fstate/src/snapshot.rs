#![forbid(unsafe_code)]

//! Immutable `{value, status, error}` records.
//!
//! A [`Snapshot<T>`] is what a container knows at one instant. Containers
//! never edit a snapshot in place; each transition swaps in a new one, so a
//! reader always sees a status paired with the value and error that belong
//! to it.
//!
//! # Invariants
//!
//! 1. `error()` is `Some` iff `status() == Status::Error`.
//! 2. `status() == Status::Data` implies `data_value()` is `Some`.
//! 3. The value carried through `Waiting` and `Error` is the last known one;
//!    it is stale and only exposed through [`Snapshot::value`].
//! 4. [`Snapshot::when`] selects exactly one branch for every status.

use std::fmt;

use crate::error::CapturedError;

/// Computation status of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// Nothing has run yet (or the container was disposed).
    #[default]
    Idle,
    /// A delayed computation is in flight.
    Waiting,
    /// The last computation produced a value.
    Data,
    /// The last computation failed.
    Error,
}

impl Status {
    /// Stable lowercase label, used in logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Waiting => "waiting",
            Self::Data => "data",
            Self::Error => "error",
        }
    }

    /// Whether this status ends a computation.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Data | Self::Error)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum State<T> {
    Idle(Option<T>),
    Waiting(Option<T>),
    Data(T),
    Error(CapturedError, Option<T>),
}

/// An immutable view of a container's value, status, and error.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    state: State<T>,
    done: bool,
}

impl<T> Snapshot<T> {
    /// Nothing computed yet.
    #[must_use]
    pub const fn idle(value: Option<T>) -> Self {
        Self {
            state: State::Idle(value),
            done: false,
        }
    }

    /// A delayed computation is running; `previous` is the last known value.
    #[must_use]
    pub const fn waiting(previous: Option<T>) -> Self {
        Self {
            state: State::Waiting(previous),
            done: false,
        }
    }

    /// A computation produced `value`.
    #[must_use]
    pub const fn data(value: T) -> Self {
        Self {
            state: State::Data(value),
            done: false,
        }
    }

    /// A computation failed; `previous` is the last known value.
    #[must_use]
    pub const fn failed(error: CapturedError, previous: Option<T>) -> Self {
        Self {
            state: State::Error(error, previous),
            done: false,
        }
    }

    /// Mark whether the value source behind this snapshot is drained.
    #[must_use]
    pub fn with_done(mut self, done: bool) -> Self {
        self.done = done;
        self
    }

    #[must_use]
    pub const fn status(&self) -> Status {
        match self.state {
            State::Idle(_) => Status::Idle,
            State::Waiting(_) => Status::Waiting,
            State::Data(_) => Status::Data,
            State::Error(..) => Status::Error,
        }
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle(_))
    }

    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        matches!(self.state, State::Waiting(_))
    }

    #[must_use]
    pub const fn has_data(&self) -> bool {
        matches!(self.state, State::Data(_))
    }

    #[must_use]
    pub const fn has_error(&self) -> bool {
        matches!(self.state, State::Error(..))
    }

    /// Whether the multi-value source feeding this container has ended.
    ///
    /// Independent of status: a drained stream keeps reporting whatever its
    /// last emission produced.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.done
    }

    /// The last known value, whatever the status.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match &self.state {
            State::Data(value) => Some(value),
            State::Idle(value) | State::Waiting(value) | State::Error(_, value) => value.as_ref(),
        }
    }

    /// The value, only when the status is [`Status::Data`].
    #[must_use]
    pub fn data_value(&self) -> Option<&T> {
        match &self.state {
            State::Data(value) => Some(value),
            _ => None,
        }
    }

    /// The captured error, only when the status is [`Status::Error`].
    #[must_use]
    pub fn error(&self) -> Option<&CapturedError> {
        match &self.state {
            State::Error(error, _) => Some(error),
            _ => None,
        }
    }

    /// Consume the snapshot, returning the last known value.
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self.state {
            State::Data(value) => Some(value),
            State::Idle(value) | State::Waiting(value) | State::Error(_, value) => value,
        }
    }

    /// Dispatch on status. Exactly one branch runs.
    pub fn when<R, I, W, D, E>(&self, branches: WhenStatus<I, W, D, E>) -> R
    where
        I: FnOnce(Option<&T>) -> R,
        W: FnOnce(Option<&T>) -> R,
        D: FnOnce(&T) -> R,
        E: FnOnce(&CapturedError) -> R,
    {
        match &self.state {
            State::Idle(value) => (branches.on_idle)(value.as_ref()),
            State::Waiting(value) => (branches.on_waiting)(value.as_ref()),
            State::Data(value) => (branches.on_data)(value),
            State::Error(error, _) => (branches.on_error)(error),
        }
    }
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self::idle(None)
    }
}

/// One branch per [`Status`]; all four are required.
///
/// ```
/// use fstate::{CapturedError, Snapshot, WhenStatus};
///
/// let snap = Snapshot::data(3);
/// let label = snap.when(WhenStatus {
///     on_idle: |_: Option<&i32>| "idle".to_string(),
///     on_waiting: |_: Option<&i32>| "loading".to_string(),
///     on_data: |n: &i32| format!("{n} items"),
///     on_error: |e: &CapturedError| format!("failed: {e}"),
/// });
/// assert_eq!(label, "3 items");
/// ```
pub struct WhenStatus<I, W, D, E> {
    pub on_idle: I,
    pub on_waiting: W,
    pub on_data: D,
    pub on_error: E,
}
