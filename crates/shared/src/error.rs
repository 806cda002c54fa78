use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ScopeMissing,
    ReentrantCommit,
    RuntimeUnavailable,
    InvariantViolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The handle was disposed, or never belonged to a live scope.
    #[error("store scope '{scope}' is not available (disposed or never initialized)")]
    ScopeMissing { scope: String },
    #[error("store '{scope}' cannot commit from inside its own notification")]
    ReentrantCommit { scope: String },
    #[error("no async runtime available to drive store mutations")]
    RuntimeUnavailable,
    #[error("collection invariant violated: {0}")]
    InvariantViolation(String),
}

impl StoreError {
    pub fn scope_missing(scope: impl Into<String>) -> Self {
        Self::ScopeMissing {
            scope: scope.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ScopeMissing { .. } => ErrorCode::ScopeMissing,
            Self::ReentrantCommit { .. } => ErrorCode::ReentrantCommit,
            Self::RuntimeUnavailable => ErrorCode::RuntimeUnavailable,
            Self::InvariantViolation(_) => ErrorCode::InvariantViolation,
        }
    }
}

/// Wire form of a [`StoreError`], carried in events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&StoreError> for ErrorReport {
    fn from(value: &StoreError) -> Self {
        Self {
            code: value.code(),
            message: value.to_string(),
        }
    }
}
