use fstate::StateError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DemoError>;

#[derive(Debug, Error)]
pub enum DemoError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("scenario `{scenario}` ended in an unexpected state: {detail}")]
    Unexpected {
        scenario: &'static str,
        detail: String,
    },
}

impl DemoError {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidArgument { .. } => 2,
            _ => 1,
        }
    }

    pub(crate) fn unexpected(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self::Unexpected {
            scenario,
            detail: detail.into(),
        }
    }
}
