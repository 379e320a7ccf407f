use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal failures an operation can resolve with.
///
/// `Failed` attaches a user-facing summary while keeping the original error
/// reachable through `source`/`underlying`, so callers can still compare
/// against the cause after annotation.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationError {
    #[error("invalid parameters")]
    InvalidParameters,
    #[error("app not found")]
    AppNotFound,
    #[error("could not open \u{201c}{name}\u{201d}")]
    OpenAppFailed { name: String },
    #[error("the operation timed out")]
    TimedOut,
    #[error("the external app returned an unknown result")]
    UnknownResult,
    #[error("the operation was cancelled")]
    Cancelled,
    #[error("{message}")]
    External { message: String },
    #[error("{failure}")]
    Failed {
        failure: String,
        #[source]
        source: Box<OperationError>,
    },
}

impl OperationError {
    pub fn external(message: impl Into<String>) -> Self {
        OperationError::External {
            message: message.into(),
        }
    }

    /// Wraps this error with a user-facing failure summary.
    pub fn with_failure(self, failure: impl Into<String>) -> Self {
        OperationError::Failed {
            failure: failure.into(),
            source: Box::new(self),
        }
    }

    /// Strips annotation layers down to the originating error.
    pub fn underlying(&self) -> &OperationError {
        match self {
            OperationError::Failed { source, .. } => source.underlying(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.underlying(), OperationError::Cancelled)
    }
}
