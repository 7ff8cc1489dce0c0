//! In-memory coordination service
//!
//! [`MemoryCoordinator`] keeps versioned nodes in process and counts writes,
//! so tests can assert that a rejected operation wrote nothing.
//! [`SandboxCoordinatorConnector`] persists the same store as JSON, one file per
//! service address when the session closes.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use super::coordinator::{
    Acl, CoordinationError, CoordinationResult, Coordinator, CoordinatorConnector, CreateMode,
    Stat, ANY_VERSION,
};

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
    version: i32,
    ephemeral: bool,
}

#[derive(Debug, Default)]
struct Store {
    nodes: BTreeMap<String, Node>,
    writes: u64,
    closes: u64,
    connects: Vec<String>,
}

/// In-memory versioned node store
#[derive(Debug, Clone, Default)]
pub struct MemoryCoordinator {
    store: Arc<Mutex<Store>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw data at `path`, bypassing the session API
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.store().nodes.get(path).map(|node| node.data.clone())
    }

    /// Version at `path`, bypassing the session API
    pub fn version(&self, path: &str) -> Option<i32> {
        self.store().nodes.get(path).map(|node| node.version)
    }

    /// Store `data` at `path` as if another client wrote it
    pub fn put_raw(&self, path: &str, data: &[u8]) {
        let mut store = self.store();
        match store.nodes.get_mut(path) {
            Some(node) => {
                node.data = data.to_vec();
                node.version += 1;
            }
            None => {
                store.nodes.insert(
                    path.to_string(),
                    Node {
                        data: data.to_vec(),
                        version: 0,
                        ephemeral: false,
                    },
                );
            }
        }
    }

    /// Successful `create` and `set` calls so far
    pub fn writes(&self) -> u64 {
        self.store().writes
    }

    /// Sessions closed so far
    pub fn closes(&self) -> u64 {
        self.store().closes
    }

    /// Addresses passed to [`CoordinatorConnector::connect`], in order
    pub fn connected_addrs(&self) -> Vec<String> {
        self.store().connects.clone()
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Coordinator for MemoryCoordinator {
    fn exists(&self, path: &str) -> CoordinationResult<Option<Stat>> {
        Ok(self.store().nodes.get(path).map(|node| Stat {
            version: node.version,
        }))
    }

    fn get(&self, path: &str) -> CoordinationResult<(Vec<u8>, Stat)> {
        self.store()
            .nodes
            .get(path)
            .map(|node| {
                (
                    node.data.clone(),
                    Stat {
                        version: node.version,
                    },
                )
            })
            .ok_or_else(|| CoordinationError::NoNode {
                path: path.to_string(),
            })
    }

    fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        _acl: &[Acl],
    ) -> CoordinationResult<()> {
        let mut store = self.store();
        if store.nodes.contains_key(path) {
            return Err(CoordinationError::NodeExists {
                path: path.to_string(),
            });
        }
        store.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_vec(),
                version: 0,
                ephemeral: mode == CreateMode::Ephemeral,
            },
        );
        store.writes += 1;
        Ok(())
    }

    fn set(&self, path: &str, data: &[u8], expected_version: i32) -> CoordinationResult<Stat> {
        let mut store = self.store();
        let node = store
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordinationError::NoNode {
                path: path.to_string(),
            })?;
        if expected_version != ANY_VERSION && expected_version != node.version {
            return Err(CoordinationError::BadVersion {
                path: path.to_string(),
                expected: expected_version,
                actual: node.version,
            });
        }
        node.data = data.to_vec();
        node.version += 1;
        let stat = Stat {
            version: node.version,
        };
        store.writes += 1;
        Ok(stat)
    }

    fn close(&self) -> CoordinationResult<()> {
        let mut store = self.store();
        store.nodes.retain(|_, node| !node.ephemeral);
        store.closes += 1;
        Ok(())
    }
}

impl CoordinatorConnector for MemoryCoordinator {
    fn connect(
        &self,
        addr: &str,
        _session_timeout: Duration,
    ) -> CoordinationResult<Box<dyn Coordinator>> {
        self.store().connects.push(addr.to_string());
        Ok(Box::new(self.clone()))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    nodes: BTreeMap<String, NodeFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeFile {
    data: String,
    version: i32,
}

/// Coordination services persisted as files under a sandbox directory
#[derive(Debug, Clone)]
pub struct SandboxCoordinatorConnector {
    root: PathBuf,
}

impl SandboxCoordinatorConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File backing the service reachable at `addr`.
    ///
    /// The `.coordinator` extension keeps these files apart from the
    /// `*.json` cluster files sharing the sandbox directory.
    pub fn path_for(&self, addr: &str) -> PathBuf {
        let name: String = addr
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.root.join(format!("{name}.coordinator"))
    }
}

impl CoordinatorConnector for SandboxCoordinatorConnector {
    fn connect(
        &self,
        addr: &str,
        _session_timeout: Duration,
    ) -> CoordinationResult<Box<dyn Coordinator>> {
        if addr.trim().is_empty() {
            return Err(CoordinationError::ConnectionLoss {
                addr: addr.to_string(),
                message: "empty coordination-service address".to_string(),
            });
        }
        let path = self.path_for(addr);
        let memory = load_store(&path, addr)?;
        Ok(Box::new(SandboxCoordinator {
            path,
            addr: addr.to_string(),
            memory,
        }))
    }
}

struct SandboxCoordinator {
    path: PathBuf,
    addr: String,
    memory: MemoryCoordinator,
}

impl Coordinator for SandboxCoordinator {
    fn exists(&self, path: &str) -> CoordinationResult<Option<Stat>> {
        self.memory.exists(path)
    }

    fn get(&self, path: &str) -> CoordinationResult<(Vec<u8>, Stat)> {
        self.memory.get(path)
    }

    fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        acl: &[Acl],
    ) -> CoordinationResult<()> {
        self.memory.create(path, data, mode, acl)
    }

    fn set(&self, path: &str, data: &[u8], expected_version: i32) -> CoordinationResult<Stat> {
        self.memory.set(path, data, expected_version)
    }

    fn close(&self) -> CoordinationResult<()> {
        self.memory.close()?;
        let file = StoreFile {
            nodes: self
                .memory
                .store()
                .nodes
                .iter()
                .map(|(path, node)| {
                    (
                        path.clone(),
                        NodeFile {
                            data: STANDARD.encode(&node.data),
                            version: node.version,
                        },
                    )
                })
                .collect(),
        };
        let contents = serde_json::to_string_pretty(&file)
            .map_err(|e| self.io_error(e.to_string()))?;
        fs::write(&self.path, contents).map_err(|e| self.io_error(e.to_string()))
    }
}

impl SandboxCoordinator {
    fn io_error(&self, message: String) -> CoordinationError {
        CoordinationError::ConnectionLoss {
            addr: self.addr.clone(),
            message: format!("{}: {}", self.path.display(), message),
        }
    }
}

fn load_store(path: &Path, addr: &str) -> CoordinationResult<MemoryCoordinator> {
    let memory = MemoryCoordinator::new();
    if !path.exists() {
        return Ok(memory);
    }

    let failure = |message: String| CoordinationError::ConnectionLoss {
        addr: addr.to_string(),
        message: format!("{}: {}", path.display(), message),
    };
    let contents = fs::read_to_string(path).map_err(|e| failure(e.to_string()))?;
    let file: StoreFile = serde_json::from_str(&contents).map_err(|e| failure(e.to_string()))?;

    {
        let mut store = memory.store();
        for (node_path, node) in file.nodes {
            let data = STANDARD
                .decode(&node.data)
                .map_err(|e| failure(e.to_string()))?;
            store.nodes.insert(
                node_path,
                Node {
                    data,
                    version: node.version,
                    ephemeral: false,
                },
            );
        }
    }
    Ok(memory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_then_set_bumps_version() {
        let zk = MemoryCoordinator::new();
        zk.create("/a", b"1", CreateMode::Persistent, &Acl::world_all())
            .unwrap();
        assert_eq!(zk.exists("/a").unwrap(), Some(Stat { version: 0 }));

        let stat = zk.set("/a", b"2", 0).unwrap();
        assert_eq!(stat.version, 1);
        assert_eq!(zk.get("/a").unwrap().0, b"2".to_vec());
        assert_eq!(zk.writes(), 2);
    }

    #[test]
    fn test_create_existing_node_fails() {
        let zk = MemoryCoordinator::new();
        zk.create("/a", b"", CreateMode::Persistent, &[]).unwrap();
        assert!(matches!(
            zk.create("/a", b"", CreateMode::Persistent, &[]),
            Err(CoordinationError::NodeExists { .. })
        ));
    }

    #[test]
    fn test_set_with_stale_version_fails() {
        let zk = MemoryCoordinator::new();
        zk.create("/a", b"1", CreateMode::Persistent, &[]).unwrap();
        zk.set("/a", b"2", 0).unwrap();

        let err = zk.set("/a", b"3", 0).unwrap_err();
        assert_eq!(
            err,
            CoordinationError::BadVersion {
                path: "/a".to_string(),
                expected: 0,
                actual: 1,
            }
        );
        assert!(zk.set("/a", b"3", ANY_VERSION).is_ok());
    }

    #[test]
    fn test_missing_node() {
        let zk = MemoryCoordinator::new();
        assert_eq!(zk.exists("/nope").unwrap(), None);
        assert!(matches!(zk.get("/nope"), Err(CoordinationError::NoNode { .. })));
        assert!(matches!(
            zk.set("/nope", b"", ANY_VERSION),
            Err(CoordinationError::NoNode { .. })
        ));
    }

    #[test]
    fn test_ephemeral_nodes_vanish_on_close() {
        let zk = MemoryCoordinator::new();
        zk.create("/lock", b"", CreateMode::Ephemeral, &[]).unwrap();
        zk.create("/keep", b"", CreateMode::Persistent, &[]).unwrap();
        zk.close().unwrap();
        assert!(zk.data("/lock").is_none());
        assert!(zk.data("/keep").is_some());
        assert_eq!(zk.closes(), 1);
    }

    #[test]
    fn test_sandbox_persists_on_close() {
        let dir = TempDir::new().unwrap();
        let connector = SandboxCoordinatorConnector::new(dir.path());
        let timeout = Duration::from_secs(1);

        let session = connector.connect("127.0.0.1:2181", timeout).unwrap();
        session
            .create("/routes", b"{}", CreateMode::Persistent, &[])
            .unwrap();
        session.set("/routes", b"{\"x\":1}", 0).unwrap();
        session.close().unwrap();
        assert!(connector.path_for("127.0.0.1:2181").exists());

        let reopened = connector.connect("127.0.0.1:2181", timeout).unwrap();
        let (data, stat) = reopened.get("/routes").unwrap();
        assert_eq!(data, b"{\"x\":1}".to_vec());
        assert_eq!(stat.version, 1);
    }

    #[test]
    fn test_sandbox_rejects_empty_address() {
        let dir = TempDir::new().unwrap();
        let connector = SandboxCoordinatorConnector::new(dir.path());
        assert!(connector.connect("", Duration::from_secs(1)).is_err());
    }
}
