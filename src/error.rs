/*!
 * Error types for TableShift
 */

use std::fmt;
use std::io;

use tableshift_core_resilience::{RetryError, Retryable};
use thiserror::Error;

use crate::cluster::ClusterError;
use crate::migrate::filter::FilterError;
use crate::registry::coordinator::CoordinationError;

pub type Result<T> = std::result::Result<T, ShiftError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;
pub const EXIT_INCONSISTENT: i32 = 3;

#[derive(Error, Debug)]
pub enum ShiftError {
    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Window bound that does not parse as `YYYY-MM-DD_HH:MM:SS`
    #[error("Invalid timestamp '{input}': {reason}")]
    InvalidTimestamp { input: String, reason: String },

    /// Table-name filter rule that does not compile
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// A cluster call failed
    #[error("{context}: {source}")]
    Cluster {
        context: String,
        #[source]
        source: ClusterError,
    },

    /// A coordination-service call failed
    #[error("{context}: {source}")]
    Coordination {
        context: String,
        #[source]
        source: CoordinationError,
    },

    /// No routing entry stored for the table
    #[error("Routing entry not found: {path}")]
    RoutingNotFound { path: String },

    /// Stored routing entry is not valid JSON of the expected shape
    #[error("Malformed routing entry at {path}: {message}")]
    RoutingDecode { path: String, message: String },

    /// Another writer changed the routing entry since it was read
    #[error("Routing entry at {path} changed concurrently (expected version {expected})")]
    VersionConflict { path: String, expected: i32 },

    /// The routing entry names a different owner than the origin cluster
    #[error(
        "Table '{table}' is routed to cluster '{recorded}', not to the origin cluster '{local}'"
    )]
    OwnershipMismatch {
        table: String,
        recorded: String,
        local: String,
    },

    /// Routing was switched but the origin cluster could not be blocked
    #[error(
        "Switch of table '{table}' incomplete: {source} ({})",
        repair_note(.rolled_back)
    )]
    SwitchIncomplete {
        table: String,
        rolled_back: bool,
        #[source]
        source: Box<ShiftError>,
    },

    /// A retried operation reached its attempt cap
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: ClusterError,
    },

    /// The run was cancelled or hit its deadline
    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn repair_note(rolled_back: &bool) -> &'static str {
    if *rolled_back {
        "routing entry restored"
    } else {
        "routing entry NOT restored, manual repair required"
    }
}

impl ShiftError {
    /// Wrap a cluster error with the operation it came from
    pub fn cluster(context: impl Into<String>, source: ClusterError) -> Self {
        ShiftError::Cluster {
            context: context.into(),
            source,
        }
    }

    /// Wrap a coordination error with the operation it came from
    pub fn coordination(context: impl Into<String>, source: CoordinationError) -> Self {
        ShiftError::Coordination {
            context: context.into(),
            source,
        }
    }

    /// Convert the outcome of a retried cluster call
    pub fn from_retry(error: RetryError<ClusterError>) -> Self {
        match error {
            RetryError::Cancelled { operation, .. } => ShiftError::Cancelled { operation },
            RetryError::Exhausted {
                operation,
                attempts,
                last_error,
            } => ShiftError::RetriesExhausted {
                operation,
                attempts,
                source: last_error,
            },
            RetryError::Fatal { operation, error } => ShiftError::cluster(operation, error),
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ShiftError::Config(_)
            | ShiftError::InvalidTimestamp { .. }
            | ShiftError::Filter(_) => EXIT_FATAL,
            ShiftError::SwitchIncomplete {
                rolled_back: false, ..
            } => EXIT_INCONSISTENT,
            _ => EXIT_PARTIAL,
        }
    }

    /// Check if this error is fatal (retrying without operator action is pointless)
    pub fn is_fatal(&self) -> bool {
        match self {
            ShiftError::Config(_)
            | ShiftError::InvalidTimestamp { .. }
            | ShiftError::Filter(_)
            | ShiftError::RoutingNotFound { .. }
            | ShiftError::RoutingDecode { .. }
            | ShiftError::OwnershipMismatch { .. }
            | ShiftError::SwitchIncomplete { .. }
            | ShiftError::RetriesExhausted { .. }
            | ShiftError::Cancelled { .. } => true,

            ShiftError::Cluster { source, .. } => !source.is_retryable(),
            ShiftError::Coordination { .. }
            | ShiftError::VersionConflict { .. }
            | ShiftError::Io(_) => false,
        }
    }

    /// Check if this error is transient (temporary, worth retrying)
    pub fn is_transient(&self) -> bool {
        match self {
            ShiftError::Cluster { source, .. } => source.is_retryable(),
            ShiftError::Coordination { source, .. } => {
                matches!(source, CoordinationError::ConnectionLoss { .. })
            }
            ShiftError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            ShiftError::Config(_) => ErrorCategory::Configuration,
            ShiftError::InvalidTimestamp { .. } | ShiftError::Filter(_) => ErrorCategory::Validation,
            ShiftError::Cluster { .. } => ErrorCategory::Cluster,
            ShiftError::Coordination { .. } => ErrorCategory::Coordination,
            ShiftError::RoutingNotFound { .. } | ShiftError::RoutingDecode { .. } => {
                ErrorCategory::Routing
            }
            ShiftError::OwnershipMismatch { .. } => ErrorCategory::Ownership,
            ShiftError::VersionConflict { .. } | ShiftError::SwitchIncomplete { .. } => {
                ErrorCategory::Consistency
            }
            ShiftError::RetriesExhausted { .. } => ErrorCategory::Retry,
            ShiftError::Cancelled { .. } => ErrorCategory::Cancelled,
            ShiftError::Io(_) => ErrorCategory::IoError,
        }
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Configuration errors
    Configuration,
    /// Malformed operator input
    Validation,
    /// Key-value cluster errors
    Cluster,
    /// Coordination-service errors
    Coordination,
    /// Missing or malformed routing entries
    Routing,
    /// Ownership precondition violations
    Ownership,
    /// Concurrent writers or half-applied switches
    Consistency,
    /// Retry exhaustion
    Retry,
    /// Cancellation or deadline
    Cancelled,
    /// Local I/O errors
    IoError,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Cluster => write!(f, "cluster"),
            ErrorCategory::Coordination => write!(f, "coordination"),
            ErrorCategory::Routing => write!(f, "routing"),
            ErrorCategory::Ownership => write!(f, "ownership"),
            ErrorCategory::Consistency => write!(f, "consistency"),
            ErrorCategory::Retry => write!(f, "retry"),
            ErrorCategory::Cancelled => write!(f, "cancelled"),
            ErrorCategory::IoError => write!(f, "io"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unavailable() -> ClusterError {
        ClusterError::Unavailable {
            operation: "set".to_string(),
            message: "ERR_TIMEOUT".to_string(),
        }
    }

    #[test]
    fn test_fatal_errors() {
        assert!(ShiftError::Config("no root".to_string()).is_fatal());
        assert!(ShiftError::OwnershipMismatch {
            table: "t".to_string(),
            recorded: "a".to_string(),
            local: "b".to_string(),
        }
        .is_fatal());
        assert!(ShiftError::cluster(
            "scan",
            ClusterError::ScannerInvalid {
                table: "t".to_string(),
                message: "gone".to_string(),
            }
        )
        .is_fatal());
    }

    #[test]
    fn test_transient_errors() {
        let err = ShiftError::cluster("set on 't'", unavailable());
        assert!(err.is_transient());
        assert!(!err.is_fatal());
        assert!(!ShiftError::Config("x".to_string()).is_transient());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ShiftError::Config("x".to_string()).exit_code(), EXIT_FATAL);
        assert_eq!(
            ShiftError::RoutingNotFound {
                path: "/r/t".to_string()
            }
            .exit_code(),
            EXIT_PARTIAL
        );

        let half_done = |rolled_back| ShiftError::SwitchIncomplete {
            table: "t".to_string(),
            rolled_back,
            source: Box::new(ShiftError::cluster("block origin", unavailable())),
        };
        assert_eq!(half_done(true).exit_code(), EXIT_PARTIAL);
        assert_eq!(half_done(false).exit_code(), EXIT_INCONSISTENT);
    }

    #[test]
    fn test_error_display() {
        let err = ShiftError::OwnershipMismatch {
            table: "orders".to_string(),
            recorded: "A".to_string(),
            local: "B".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Table 'orders' is routed to cluster 'A', not to the origin cluster 'B'"
        );

        let err = ShiftError::SwitchIncomplete {
            table: "orders".to_string(),
            rolled_back: false,
            source: Box::new(ShiftError::cluster("block origin", unavailable())),
        };
        assert!(err.to_string().contains("manual repair required"));
    }

    #[test]
    fn test_from_retry() {
        let cancelled = ShiftError::from_retry(RetryError::Cancelled {
            operation: "open".to_string(),
            attempts: 2,
        });
        assert_eq!(cancelled.category(), ErrorCategory::Cancelled);

        let fatal = ShiftError::from_retry(RetryError::Fatal {
            operation: "scan 't'".to_string(),
            error: ClusterError::InvalidArgument("bad".to_string()),
        });
        assert_eq!(fatal.category(), ErrorCategory::Cluster);
        assert_eq!(fatal.to_string(), "scan 't': invalid argument: bad");
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::Ownership.to_string(), "ownership");
        assert_eq!(ErrorCategory::Consistency.to_string(), "consistency");
    }
}
