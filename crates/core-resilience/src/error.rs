//! Error types for retry execution

use thiserror::Error;

/// Why a retried operation stopped without producing a value.
#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// The cancellation token fired (explicit cancel or deadline).
    #[error("{operation} cancelled after {attempts} attempt(s)")]
    Cancelled { operation: String, attempts: u32 },

    /// The policy's attempt cap was reached.
    #[error("{operation} failed after {attempts} attempt(s): {last_error}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last_error: E,
    },

    /// The operation returned an error that must not be retried.
    #[error("{operation} failed permanently: {error}")]
    Fatal { operation: String, error: E },
}

impl<E> RetryError<E> {
    /// Name of the operation that failed
    pub fn operation(&self) -> &str {
        match self {
            RetryError::Cancelled { operation, .. }
            | RetryError::Exhausted { operation, .. }
            | RetryError::Fatal { operation, .. } => operation,
        }
    }

    /// Whether the run was stopped by cancellation rather than by the operation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    /// The underlying operation error, when there is one
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Cancelled { .. } => None,
            RetryError::Exhausted { last_error, .. } => Some(last_error),
            RetryError::Fatal { error, .. } => Some(error),
        }
    }
}
