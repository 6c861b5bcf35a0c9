#![forbid(unsafe_code)]

//! Runtime configuration shared by a registry and the containers it creates.
//!
//! Defaults can be overridden through environment variables with the
//! `FSTATE_` prefix:
//!
//! | Variable                   | Field                  | Values                |
//! |----------------------------|------------------------|-----------------------|
//! | `FSTATE_TRACE_TRANSITIONS` | `trace_transitions`    | `1`/`true`, `0`/`false` |
//! | `FSTATE_CATCH_ERRORS`      | `default_catch_error`  | `1`/`true`, `0`/`false` |
//! | `FSTATE_UNDO_STACK_LENGTH` | `undo_stack_length`    | unsigned integer      |
//!
//! Unparseable values are ignored and the default is kept.

use std::env;

pub const ENV_TRACE_TRANSITIONS: &str = "FSTATE_TRACE_TRANSITIONS";
pub const ENV_CATCH_ERRORS: &str = "FSTATE_CATCH_ERRORS";
pub const ENV_UNDO_STACK_LENGTH: &str = "FSTATE_UNDO_STACK_LENGTH";

/// Knobs applied to every container a registry creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateConfig {
    /// Emit a `trace`-level event for every snapshot transition.
    pub trace_transitions: bool,
    /// Whether mutations capture synchronous failures unless a call says
    /// otherwise.
    pub default_catch_error: bool,
    /// How many past data snapshots each container keeps for undo. Zero
    /// disables history.
    pub undo_stack_length: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            trace_transitions: true,
            default_catch_error: false,
            undo_stack_length: 0,
        }
    }
}

impl StateConfig {
    /// Defaults with `FSTATE_*` environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup (used by `from_env`).
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(val) = lookup(ENV_TRACE_TRANSITIONS)
            && let Some(flag) = parse_flag(&val)
        {
            self.trace_transitions = flag;
        }
        if let Some(val) = lookup(ENV_CATCH_ERRORS)
            && let Some(flag) = parse_flag(&val)
        {
            self.default_catch_error = flag;
        }
        if let Some(val) = lookup(ENV_UNDO_STACK_LENGTH)
            && let Ok(n) = val.trim().parse()
        {
            self.undo_stack_length = n;
        }
        self
    }

    #[must_use]
    pub fn with_trace_transitions(mut self, enabled: bool) -> Self {
        self.trace_transitions = enabled;
        self
    }

    #[must_use]
    pub fn with_default_catch_error(mut self, catch: bool) -> Self {
        self.default_catch_error = catch;
        self
    }

    #[must_use]
    pub fn with_undo_stack_length(mut self, length: usize) -> Self {
        self.undo_stack_length = length;
        self
    }
}

fn parse_flag(val: &str) -> Option<bool> {
    let val = val.trim();
    if val == "1" || val.eq_ignore_ascii_case("true") {
        Some(true)
    } else if val == "0" || val.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
