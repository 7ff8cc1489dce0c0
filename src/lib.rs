/*!
 * TableShift - table migration and routing for key-value clusters
 *
 * - Provision the tables a source cluster created in a time window on a
 *   target cluster
 * - Copy their records with an unordered scan, retrying transient failures
 *   under a cancellable retry policy
 * - Keep per-table routing entries in a coordination service and switch a
 *   table's owner only after checking who owns it now
 */

pub mod cli_style;
pub mod cluster;
pub mod config;
pub mod dry_run;
pub mod error;
pub mod logging;
pub mod migrate;
pub mod registry;
pub mod window;

// Re-export commonly used types
pub use cluster::{ClusterClient, ClusterConnector, ClusterError, ClusterIdentity, TableInfo};
pub use config::{MigrationConfig, RoutingConfig, ShiftConfig};
pub use error::{ErrorCategory, Result, ShiftError};
pub use migrate::{MigrationMode, MigrationReport, Migrator};
pub use registry::{RoutingEntry, RoutingRegistry};
pub use tableshift_core_resilience::{CancellationToken, RetryPolicy};
pub use window::MigrationWindow;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
