/*!
 * Routing registry
 *
 * Per-table ownership records kept in a coordination service. Each table has
 * one node at `{root}/{table}` holding `{"cluster_name":..,"meta_addrs":..}`;
 * table-aware clients read it to decide which cluster to address.
 *
 * Every write is version-checked so a concurrent writer surfaces as
 * [`ShiftError::VersionConflict`] instead of being overwritten silently.
 */

pub mod coordinator;
pub mod memory;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterClient, DENY_RECONFIG_ALL, ENV_DENY_CLIENT_REQUEST};
use crate::config::{normalize_root, RoutingConfig};
use crate::error::{Result, ShiftError};

use self::coordinator::{Acl, CoordinationError, Coordinator, CoordinatorConnector, CreateMode};

pub use self::memory::{MemoryCoordinator, SandboxCoordinatorConnector};

/// Which cluster owns a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingEntry {
    pub cluster_name: String,
    /// Comma-separated meta server addresses of the owner
    pub meta_addrs: String,
}

impl RoutingEntry {
    pub fn new(cluster_name: impl Into<String>, meta_addrs: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            meta_addrs: meta_addrs.into(),
        }
    }

    /// Compact JSON as stored in the coordination service
    pub fn encode(&self) -> Vec<u8> {
        // Two string fields cannot fail to serialize
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Parse stored bytes; whitespace between tokens is accepted
    pub fn decode(path: &str, data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| ShiftError::RoutingDecode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }
}

/// Result of a successful [`RoutingRegistry::put`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub path: String,
    /// Exact text written to the node
    pub raw: String,
}

/// Result of a successful [`RoutingRegistry::switch_owner`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchOutcome {
    pub path: String,
    pub previous: RoutingEntry,
    pub current: RoutingEntry,
}

/// A coordination-service session scoped to one root path
pub struct RoutingRegistry {
    conn: Box<dyn Coordinator>,
    root: String,
    closed: bool,
}

impl RoutingRegistry {
    /// Connect to the coordination service at `addr`
    pub fn open(
        connector: &dyn CoordinatorConnector,
        addr: &str,
        root: &str,
        session_timeout: Duration,
    ) -> Result<Self> {
        let root = normalize_root(root)?;
        let addr = addr.trim();
        if addr.is_empty() {
            return Err(ShiftError::Config(
                "coordination-service address is empty".to_string(),
            ));
        }

        debug!(addr, root = %root, "connecting to coordination service");
        // An unreachable service is a startup problem, not a partial run
        let conn = connector.connect(addr, session_timeout).map_err(|e| {
            ShiftError::Config(format!("cannot connect to coordination service {addr}: {e}"))
        })?;

        Ok(Self::with_session(conn, root))
    }

    /// Wrap an already connected session
    pub fn with_session(conn: Box<dyn Coordinator>, root: String) -> Self {
        Self {
            conn,
            root,
            closed: false,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Node path for `table`
    pub fn path(&self, table: &str) -> Result<String> {
        if table.is_empty() || table.contains('/') {
            return Err(ShiftError::Config(format!("invalid table name '{table}'")));
        }
        Ok(format!("{}/{}", self.root, table))
    }

    /// Read the routing entry of `table`
    pub fn get(&self, table: &str) -> Result<RoutingEntry> {
        let path = self.path(table)?;
        let (entry, _, _) = self.read_versioned(&path)?;
        Ok(entry)
    }

    /// Record `cluster_name` / `meta_addrs` as the owner of `table`,
    /// creating the node if it does not exist yet.
    ///
    /// A new node is created with the entry already in it, so a failure of
    /// the following write never leaves an empty node behind.
    pub fn put(&self, table: &str, cluster_name: &str, meta_addrs: &str) -> Result<PutOutcome> {
        let path = self.path(table)?;
        let data = RoutingEntry::new(cluster_name, meta_addrs).encode();

        let version = match self
            .conn
            .exists(&path)
            .map_err(|e| ShiftError::coordination(format!("stat {path}"), e))?
        {
            Some(stat) => stat.version,
            None => {
                self.conn
                    .create(&path, &data, CreateMode::Persistent, &Acl::world_all())
                    .map_err(|e| self.write_error(&path, 0, e))?;
                0
            }
        };

        self.write_versioned(&path, &data, version)?;

        let raw = String::from_utf8_lossy(&data).into_owned();
        info!(table, path = %path, entry = %raw, "routing entry written");
        Ok(PutOutcome { path, raw })
    }

    /// Record the cluster `client` talks to as the owner of `table`
    pub fn register_current(&self, table: &str, client: &dyn ClusterClient) -> Result<PutOutcome> {
        let identity = client
            .query_identity()
            .map_err(|e| ShiftError::cluster("query cluster identity", e))?;
        self.put(table, &identity.cluster_name, &identity.meta_servers)
    }

    /// Move ownership of `table` from the cluster behind `origin` to the
    /// cluster behind `target`, then block clients on the origin.
    ///
    /// Nothing is written unless the current entry names the origin cluster.
    /// If blocking the origin fails after the entry was switched, the previous
    /// entry is restored (version-checked) and
    /// [`ShiftError::SwitchIncomplete`] reports whether that succeeded.
    pub fn switch_owner(
        &self,
        table: &str,
        origin: &dyn ClusterClient,
        target: &dyn ClusterClient,
        target_addrs: &str,
    ) -> Result<SwitchOutcome> {
        let path = self.path(table)?;
        let (previous, previous_raw, version) = self.read_versioned(&path)?;

        let local = origin
            .query_identity()
            .map_err(|e| ShiftError::cluster("query origin cluster identity", e))?;
        if previous.cluster_name != local.cluster_name {
            return Err(ShiftError::OwnershipMismatch {
                table: table.to_string(),
                recorded: previous.cluster_name,
                local: local.cluster_name,
            });
        }

        let remote = target
            .query_identity()
            .map_err(|e| ShiftError::cluster("query target cluster identity", e))?;
        let current = RoutingEntry::new(remote.cluster_name, target_addrs);

        let written = self.write_versioned(&path, &current.encode(), version)?;
        info!(
            table,
            from = %previous.cluster_name,
            to = %current.cluster_name,
            "routing entry switched"
        );

        let envs = BTreeMap::from([(
            ENV_DENY_CLIENT_REQUEST.to_string(),
            DENY_RECONFIG_ALL.to_string(),
        )]);
        if let Err(e) = origin.update_table_env(table, &envs) {
            let cause = ShiftError::cluster(format!("block clients of '{table}' on origin"), e);
            error!(table, error = %cause, "origin not blocked, restoring routing entry");

            let rolled_back = match self.conn.set(&path, &previous_raw, written) {
                Ok(_) => {
                    warn!(table, owner = %previous.cluster_name, "routing entry restored");
                    true
                }
                Err(restore) => {
                    error!(
                        table,
                        error = %restore,
                        "routing entry could not be restored, manual repair required"
                    );
                    false
                }
            };
            return Err(ShiftError::SwitchIncomplete {
                table: table.to_string(),
                rolled_back,
                source: Box::new(cause),
            });
        }

        info!(table, origin = %local.cluster_name, "origin cluster now denies client requests");
        Ok(SwitchOutcome {
            path,
            previous,
            current,
        })
    }

    /// End the session
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.conn
            .close()
            .map_err(|e| ShiftError::coordination("close coordination session", e))
    }

    fn read_versioned(&self, path: &str) -> Result<(RoutingEntry, Vec<u8>, i32)> {
        let exists = self
            .conn
            .exists(path)
            .map_err(|e| ShiftError::coordination(format!("stat {path}"), e))?;
        if exists.is_none() {
            return Err(ShiftError::RoutingNotFound {
                path: path.to_string(),
            });
        }

        let (data, stat) = self.conn.get(path).map_err(|e| match e {
            CoordinationError::NoNode { path } => ShiftError::RoutingNotFound { path },
            other => ShiftError::coordination(format!("read {path}"), other),
        })?;
        let entry = RoutingEntry::decode(path, &data)?;
        Ok((entry, data, stat.version))
    }

    fn write_versioned(&self, path: &str, data: &[u8], expected: i32) -> Result<i32> {
        self.conn
            .set(path, data, expected)
            .map(|stat| stat.version)
            .map_err(|e| self.write_error(path, expected, e))
    }

    fn write_error(&self, path: &str, expected: i32, error: CoordinationError) -> ShiftError {
        match error {
            CoordinationError::BadVersion { .. }
            | CoordinationError::NodeExists { .. }
            | CoordinationError::NoNode { .. } => ShiftError::VersionConflict {
                path: path.to_string(),
                expected,
            },
            other => ShiftError::coordination(format!("write {path}"), other),
        }
    }
}

impl Drop for RoutingRegistry {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.conn.close() {
                warn!(error = %e, "failed to close coordination session");
            }
        }
    }
}

/// Coordination-service address to use: the configured one, or the hosts
/// the origin cluster itself reports
pub fn resolve_coordinator(config: &RoutingConfig, origin: &dyn ClusterClient) -> Result<String> {
    if let Some(addr) = config
        .coordinator
        .as_deref()
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
    {
        return Ok(addr.to_string());
    }

    let identity = origin
        .query_identity()
        .map_err(|e| ShiftError::cluster("query cluster identity", e))?;
    if identity.zookeeper_hosts.trim().is_empty() {
        return Err(ShiftError::Config(format!(
            "no coordination-service address configured and cluster '{}' reports none",
            identity.cluster_name
        )));
    }
    debug!(
        cluster = %identity.cluster_name,
        hosts = %identity.zookeeper_hosts,
        "using the cluster's coordination service"
    );
    Ok(identity.zookeeper_hosts)
}
