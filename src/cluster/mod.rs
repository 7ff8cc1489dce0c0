/*!
 * Cluster client facade
 *
 * The administrative and data-plane calls the migration and routing layers
 * need from one cluster of the key-value store. Drivers implement
 * [`ClusterClient`]; the wire protocol and session pooling behind them are
 * the driver's business.
 *
 * Two drivers ship with the crate:
 * - [`memory::MemoryCluster`] keeps everything in process and can inject
 *   faults, which is what the tests drive
 * - [`sandbox::SandboxConnector`] persists memory clusters as JSON files so
 *   an operator can rehearse a migration locally
 */

pub mod memory;
pub mod sandbox;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tableshift_core_resilience::Retryable;
use thiserror::Error;

pub use memory::{FaultPoint, MemoryCluster};
pub use sandbox::SandboxConnector;

/// Result type alias for cluster calls
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Environment key that makes replicas refuse client requests for a table
pub const ENV_DENY_CLIENT_REQUEST: &str = "replica.deny_client_request";

/// Value of [`ENV_DENY_CLIENT_REQUEST`] that pushes clients to re-resolve routing
pub const DENY_RECONFIG_ALL: &str = "reconfig*all";

/// Errors reported by a cluster driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// The table already exists (provisioning treats this as success)
    #[error("table '{table}' already exists (ERR_APP_EXIST)")]
    AlreadyExists { table: String },

    /// The table does not exist on this cluster
    #[error("table '{table}' not found (ERR_OBJECT_NOT_FOUND)")]
    TableNotFound { table: String },

    /// The cluster could not serve the call right now
    #[error("{operation} unavailable: {message}")]
    Unavailable { operation: String, message: String },

    /// The scanner can no longer be advanced; only a new scan could continue
    #[error("scanner on table '{table}' is no longer valid: {message}")]
    ScannerInvalid { table: String, message: String },

    /// A request the cluster rejected as malformed
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Any other error the remote side returned
    #[error("{operation} failed: {message}")]
    Remote { operation: String, message: String },
}

impl ClusterError {
    /// Check if a creation error means the table is already present.
    ///
    /// Drivers that only surface the server's message text still qualify
    /// when the message carries the `EXIST` error code.
    pub fn is_already_exists(&self) -> bool {
        match self {
            ClusterError::AlreadyExists { .. } => true,
            ClusterError::Remote { message, .. } => message.contains("EXIST"),
            _ => false,
        }
    }
}

impl Retryable for ClusterError {
    fn is_retryable(&self) -> bool {
        match self {
            ClusterError::Unavailable { .. } | ClusterError::Remote { .. } => true,
            // A freshly created table may not be visible to every node yet
            ClusterError::TableNotFound { .. } => true,
            ClusterError::AlreadyExists { .. }
            | ClusterError::ScannerInvalid { .. }
            | ClusterError::InvalidArgument(_) => false,
        }
    }
}

/// Lifecycle status of a table as reported by the meta server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    /// Matches every status when used as a listing filter
    All,
    #[default]
    Available,
    Creating,
    Dropping,
    Dropped,
}

impl TableStatus {
    /// Whether a table in `status` passes this filter
    pub fn matches(self, status: TableStatus) -> bool {
        self == TableStatus::All || self == status
    }
}

/// A table as listed by the meta server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub app_id: i32,
    pub status: TableStatus,
    /// Creation time, seconds since the Unix epoch
    pub created_at: i64,
    pub partition_count: u32,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
}

/// Who a cluster says it is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterIdentity {
    pub cluster_name: String,
    /// Comma-separated meta server addresses
    pub meta_servers: String,
    /// Comma-separated coordination-service hosts the cluster uses
    pub zookeeper_hosts: String,
}

/// One stored record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Record {
    pub hash_key: Vec<u8>,
    pub sort_key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Options passed when requesting scanners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Records fetched per round trip
    pub batch_size: usize,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            timeout_ms: 10_000,
        }
    }
}

/// Administrative and data-plane access to one cluster
pub trait ClusterClient {
    /// List tables whose status passes `status`
    fn list_tables(&self, status: TableStatus) -> ClusterResult<Vec<TableInfo>>;

    /// Create a table with `partition_count` partitions
    fn create_table(
        &self,
        name: &str,
        envs: &BTreeMap<String, String>,
        partition_count: u32,
    ) -> ClusterResult<()>;

    /// Ask the cluster for its own identity
    fn query_identity(&self) -> ClusterResult<ClusterIdentity>;

    /// Merge `envs` into the table's environment
    fn update_table_env(&self, name: &str, envs: &BTreeMap<String, String>) -> ClusterResult<()>;

    /// Open a table for reads and writes
    fn open_table(&self, name: &str) -> ClusterResult<Box<dyn TableHandle>>;

    /// Persist any state the driver buffers locally
    fn flush(&self) -> ClusterResult<()> {
        Ok(())
    }
}

/// An opened table
pub trait TableHandle {
    /// Name of the opened table
    fn table_name(&self) -> &str;

    /// Request up to `count` scanners that together cover every partition
    /// once, in no particular order
    fn unordered_scanners(
        &self,
        count: usize,
        options: &ScanOptions,
    ) -> ClusterResult<Vec<Box<dyn Scanner>>>;

    /// Unconditionally write one record
    fn set(&self, hash_key: &[u8], sort_key: &[u8], value: &[u8]) -> ClusterResult<()>;
}

/// Position within an unordered scan
pub trait Scanner {
    /// Fetch the next record; `Ok(None)` once the scanner is drained
    fn next_record(&mut self) -> ClusterResult<Option<Record>>;
}

/// Turns a list of meta server addresses into a connected client
pub trait ClusterConnector {
    fn connect(&self, meta_addrs: &[String]) -> ClusterResult<Box<dyn ClusterClient>>;
}

/// Split a comma-separated address list, dropping blanks
pub fn parse_addrs(addrs: &str) -> Vec<String> {
    addrs
        .split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(str::to_string)
        .collect()
}
