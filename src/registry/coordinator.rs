//! Coordination-service client interface
//!
//! The subset of a ZooKeeper-style client the routing registry relies on:
//! versioned nodes addressed by slash-separated paths.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for coordination-service calls
pub type CoordinationResult<T> = std::result::Result<T, CoordinationError>;

/// Version argument that makes `set` skip the version check
pub const ANY_VERSION: i32 = -1;

/// Errors reported by a coordination-service client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    #[error("node {path} does not exist")]
    NoNode { path: String },

    #[error("node {path} already exists")]
    NodeExists { path: String },

    #[error("version mismatch on {path}: expected {expected}, found {actual}")]
    BadVersion {
        path: String,
        expected: i32,
        actual: i32,
    },

    #[error("connection to {addr} lost: {message}")]
    ConnectionLoss { addr: String, message: String },

    #[error("session already closed")]
    Closed,
}

/// Node metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    /// Incremented on every successful `set`; 0 right after creation
    pub version: i32,
}

/// How a node outlives the session that created it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateMode {
    #[default]
    Persistent,
    /// Removed when the creating session closes
    Ephemeral,
}

/// Permission bits
pub const PERM_ALL: u32 = 0x1f;

/// Access control entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub perms: u32,
    pub scheme: String,
    pub id: String,
}

impl Acl {
    /// `world:anyone` with every permission
    pub fn world_all() -> Vec<Acl> {
        vec![Acl {
            perms: PERM_ALL,
            scheme: "world".to_string(),
            id: "anyone".to_string(),
        }]
    }
}

/// A connected coordination-service session
pub trait Coordinator {
    /// Stat of the node at `path`, or `None` if it does not exist
    fn exists(&self, path: &str) -> CoordinationResult<Option<Stat>>;

    /// Data and stat of the node at `path`
    fn get(&self, path: &str) -> CoordinationResult<(Vec<u8>, Stat)>;

    /// Create a node; fails with `NodeExists` if it is already there
    fn create(&self, path: &str, data: &[u8], mode: CreateMode, acl: &[Acl])
        -> CoordinationResult<()>;

    /// Replace a node's data if its version equals `expected_version`
    /// (or unconditionally with [`ANY_VERSION`])
    fn set(&self, path: &str, data: &[u8], expected_version: i32) -> CoordinationResult<Stat>;

    /// End the session
    fn close(&self) -> CoordinationResult<()>;
}

/// Opens coordination-service sessions
pub trait CoordinatorConnector {
    fn connect(&self, addr: &str, session_timeout: Duration)
        -> CoordinationResult<Box<dyn Coordinator>>;
}
