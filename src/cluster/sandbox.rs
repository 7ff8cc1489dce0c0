//! Directory-backed sandbox clusters
//!
//! Each `*.json` file in the sandbox directory describes one cluster: its
//! identity, its tables and their records (keys and values base64-encoded).
//! Connecting with a meta address list picks the file whose identity lists
//! one of those addresses. Changes stay in memory until
//! [`ClusterClient::flush`] writes them back.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::memory::{ClusterState, StoredTable};
use super::{
    parse_addrs, ClusterClient, ClusterConnector, ClusterError, ClusterIdentity, ClusterResult,
    MemoryCluster, TableHandle, TableInfo, TableStatus,
};

#[derive(Debug, Serialize, Deserialize)]
struct ClusterFile {
    identity: ClusterIdentity,
    #[serde(default = "default_next_app_id")]
    next_app_id: i32,
    #[serde(default)]
    tables: Vec<TableFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableFile {
    #[serde(flatten)]
    info: TableInfo,
    #[serde(default)]
    records: Vec<RecordFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordFile {
    hash_key: String,
    sort_key: String,
    value: String,
}

fn default_next_app_id() -> i32 {
    1
}

/// Connects to clusters stored as files under a sandbox directory
#[derive(Debug, Clone)]
pub struct SandboxConnector {
    root: PathBuf,
}

impl SandboxConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Sandbox directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `cluster` to `<root>/<cluster_name>.json`, returning the path
    pub fn save(&self, cluster: &MemoryCluster) -> ClusterResult<PathBuf> {
        let state = cluster.snapshot();
        let path = self
            .root
            .join(format!("{}.json", state.identity.cluster_name));
        write_state(&path, &state)?;
        Ok(path)
    }

    /// Load the cluster that serves any of `meta_addrs`
    pub fn load(&self, meta_addrs: &[String]) -> ClusterResult<(PathBuf, MemoryCluster)> {
        if meta_addrs.is_empty() {
            return Err(ClusterError::InvalidArgument(
                "no meta server address given".to_string(),
            ));
        }

        let entries = fs::read_dir(&self.root).map_err(|e| sandbox_error(&self.root, e))?;
        for entry in entries {
            let path = entry.map_err(|e| sandbox_error(&self.root, e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let state = read_state(&path)?;
            let served = parse_addrs(&state.identity.meta_servers);
            if meta_addrs.iter().any(|addr| served.contains(addr)) {
                debug!(
                    cluster = %state.identity.cluster_name,
                    path = %path.display(),
                    "resolved sandbox cluster"
                );
                return Ok((path, MemoryCluster::from_state(state)));
            }
        }

        Err(ClusterError::InvalidArgument(format!(
            "no sandbox cluster in {} serves {}",
            self.root.display(),
            meta_addrs.join(",")
        )))
    }
}

impl ClusterConnector for SandboxConnector {
    fn connect(&self, meta_addrs: &[String]) -> ClusterResult<Box<dyn ClusterClient>> {
        let (path, cluster) = self.load(meta_addrs)?;
        Ok(Box::new(SandboxCluster { path, cluster }))
    }
}

/// A sandbox cluster loaded into memory
struct SandboxCluster {
    path: PathBuf,
    cluster: MemoryCluster,
}

impl ClusterClient for SandboxCluster {
    fn list_tables(&self, status: TableStatus) -> ClusterResult<Vec<TableInfo>> {
        self.cluster.list_tables(status)
    }

    fn create_table(
        &self,
        name: &str,
        envs: &BTreeMap<String, String>,
        partition_count: u32,
    ) -> ClusterResult<()> {
        self.cluster.create_table(name, envs, partition_count)
    }

    fn query_identity(&self) -> ClusterResult<ClusterIdentity> {
        self.cluster.query_identity()
    }

    fn update_table_env(&self, name: &str, envs: &BTreeMap<String, String>) -> ClusterResult<()> {
        self.cluster.update_table_env(name, envs)
    }

    fn open_table(&self, name: &str) -> ClusterResult<Box<dyn TableHandle>> {
        self.cluster.open_table(name)
    }

    fn flush(&self) -> ClusterResult<()> {
        write_state(&self.path, &self.cluster.snapshot())
    }
}

fn read_state(path: &Path) -> ClusterResult<ClusterState> {
    let contents = fs::read_to_string(path).map_err(|e| sandbox_error(path, e))?;
    let file: ClusterFile =
        serde_json::from_str(&contents).map_err(|e| sandbox_error(path, e))?;

    let mut tables = BTreeMap::new();
    for table in file.tables {
        let mut stored = StoredTable::new(table.info);
        for record in table.records {
            stored.insert(
                &decode(path, &record.hash_key)?,
                &decode(path, &record.sort_key)?,
                &decode(path, &record.value)?,
            );
        }
        tables.insert(stored.info.name.clone(), stored);
    }

    Ok(ClusterState {
        identity: file.identity,
        next_app_id: file.next_app_id,
        clock: None,
        tables,
    })
}

fn write_state(path: &Path, state: &ClusterState) -> ClusterResult<()> {
    let file = ClusterFile {
        identity: state.identity.clone(),
        next_app_id: state.next_app_id,
        tables: state
            .tables
            .values()
            .map(|stored| TableFile {
                info: stored.info.clone(),
                records: stored
                    .records()
                    .map(|record| RecordFile {
                        hash_key: STANDARD.encode(&record.hash_key),
                        sort_key: STANDARD.encode(&record.sort_key),
                        value: STANDARD.encode(&record.value),
                    })
                    .collect(),
            })
            .collect(),
    };
    let contents = serde_json::to_string_pretty(&file).map_err(|e| sandbox_error(path, e))?;
    fs::write(path, contents).map_err(|e| sandbox_error(path, e))
}

fn decode(path: &Path, text: &str) -> ClusterResult<Vec<u8>> {
    STANDARD.decode(text).map_err(|e| sandbox_error(path, e))
}

fn sandbox_error(path: &Path, error: impl std::fmt::Display) -> ClusterError {
    ClusterError::Remote {
        operation: format!("sandbox {}", path.display()),
        message: error.to_string(),
    }
}
