/*!
 * Configuration types for TableShift
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tableshift_core_resilience::{BackoffStrategy, RetryPolicy};

use crate::error::{Result, ShiftError};

/// Main configuration, loadable from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShiftConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,

    /// Directory holding sandbox clusters and coordination services
    #[serde(default)]
    pub sandbox_dir: Option<PathBuf>,

    /// Table migration settings
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Routing registry settings
    #[serde(default)]
    pub routing: RoutingConfig,
}

/// Settings for provisioning and copying tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Partition count for tables created on the target
    #[serde(default = "default_partition_count")]
    pub default_partition_count: u32,

    /// Create target tables with the source's partition count instead
    #[serde(default)]
    pub preserve_partition_count: bool,

    /// Copy the source table's envs onto the created table
    #[serde(default)]
    pub preserve_envs: bool,

    /// Tables whose data is copied (glob, `regex:` or exact name); copying
    /// requires at least one rule
    #[serde(default)]
    pub copy_include: Vec<String>,

    /// Tables never copied, even if included
    #[serde(default)]
    pub copy_exclude: Vec<String>,

    /// Pause after each successful table creation, in milliseconds
    #[serde(default = "default_creation_pause_ms")]
    pub creation_pause_ms: u64,

    /// Unordered scanners requested per table
    #[serde(default = "default_scanner_count")]
    pub scanner_count: usize,

    /// Records fetched per scanner round trip
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,

    /// Per-call scan timeout in milliseconds
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,

    /// Log copy progress every N records
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Deadline for the whole run in seconds (None = no deadline)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Waiting for created tables to become serviceable
    #[serde(default)]
    pub settle: SettleConfig,

    /// Retry behaviour for every data-plane call
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            default_partition_count: default_partition_count(),
            preserve_partition_count: false,
            preserve_envs: false,
            copy_include: Vec::new(),
            copy_exclude: Vec::new(),
            creation_pause_ms: default_creation_pause_ms(),
            settle: SettleConfig::default(),
            retry: RetryConfig::default(),
            scanner_count: default_scanner_count(),
            scan_batch_size: default_scan_batch_size(),
            scan_timeout_ms: default_scan_timeout_ms(),
            progress_interval: default_progress_interval(),
            timeout_secs: None,
        }
    }
}

impl MigrationConfig {
    /// Reject values that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        if self.default_partition_count == 0 {
            return Err(ShiftError::Config(
                "default_partition_count must be at least 1".to_string(),
            ));
        }
        if self.scanner_count == 0 {
            return Err(ShiftError::Config(
                "scanner_count must be at least 1".to_string(),
            ));
        }
        if self.progress_interval == 0 {
            return Err(ShiftError::Config(
                "progress_interval must be at least 1".to_string(),
            ));
        }
        if !self.retry.jitter_factor.is_finite() {
            return Err(ShiftError::Config(format!(
                "retry.jitter_factor must be a finite number, got {}",
                self.retry.jitter_factor
            )));
        }
        Ok(())
    }

    /// Reject runs that would copy without naming the tables to copy
    pub fn validate_copy_rules(&self) -> Result<()> {
        if self.copy_include.iter().all(|rule| rule.trim().is_empty()) {
            return Err(ShiftError::Config(
                "copying needs at least one copy_include rule (e.g. \"*loki*\" or \"*\")"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn creation_pause(&self) -> Duration {
        Duration::from_millis(self.creation_pause_ms)
    }
}

/// How the orchestrator waits for created tables before copying
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleConfig {
    /// Poll each created table until it opens; otherwise sleep `fixed_delay_secs`
    #[serde(default = "default_true")]
    pub poll: bool,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Give up polling after this long and start copying anyway
    #[serde(default = "default_settle_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_fixed_delay_secs")]
    pub fixed_delay_secs: u64,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            poll: true,
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_settle_timeout_secs(),
            fixed_delay_secs: default_fixed_delay_secs(),
        }
    }
}

/// Backoff strategy names accepted in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

impl From<BackoffKind> for BackoffStrategy {
    fn from(kind: BackoffKind) -> Self {
        match kind {
            BackoffKind::Fixed => BackoffStrategy::Fixed,
            BackoffKind::Linear => BackoffStrategy::Linear,
            BackoffKind::Exponential => BackoffStrategy::Exponential,
        }
    }
}

/// Retry settings for data-plane calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_retry_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default)]
    pub backoff: BackoffKind,

    /// Attempts per call before giving up (None = until cancelled)
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Extra random delay as a fraction of each delay
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_retry_delay_ms(),
            max_delay_ms: default_retry_delay_ms(),
            backoff: BackoffKind::Fixed,
            max_attempts: None,
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    /// Build the retry policy these settings describe
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff: self.backoff.into(),
            max_attempts: self.max_attempts.map(|n| n.max(1)),
            jitter_factor: self.jitter_factor.max(0.0),
        }
    }
}

/// Settings for the routing registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Path under which routing entries live, e.g. `/pegasus/meta_proxy/tables`
    #[serde(default)]
    pub root: Option<String>,

    /// Coordination-service address (defaults to the cluster's own hosts)
    #[serde(default)]
    pub coordinator: Option<String>,

    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            root: None,
            coordinator: None,
            session_timeout_ms: default_session_timeout_ms(),
        }
    }
}

impl RoutingConfig {
    /// The configured root, normalised without a trailing slash
    pub fn root(&self) -> Result<String> {
        let root = self
            .root
            .as_deref()
            .map(str::trim)
            .filter(|root| !root.is_empty())
            .ok_or_else(|| ShiftError::Config("routing root path is not set".to_string()))?;
        normalize_root(root)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

/// Validate an absolute coordination-service path and strip trailing slashes
pub fn normalize_root(root: &str) -> Result<String> {
    if !root.starts_with('/') {
        return Err(ShiftError::Config(format!(
            "routing root '{root}' must be an absolute path"
        )));
    }
    Ok(root.trim_end_matches('/').to_string())
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_partition_count() -> u32 {
    4
}

fn default_creation_pause_ms() -> u64 {
    1000
}

fn default_scanner_count() -> usize {
    1
}

fn default_scan_batch_size() -> usize {
    1000
}

fn default_scan_timeout_ms() -> u64 {
    10_000
}

fn default_progress_interval() -> u64 {
    1000
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_settle_timeout_secs() -> u64 {
    60
}

fn default_fixed_delay_secs() -> u64 {
    20
}

fn default_retry_delay_ms() -> u64 {
    10_000
}

fn default_session_timeout_ms() -> u64 {
    1000
}

impl ShiftConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ShiftError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&contents)
            .map_err(|e| ShiftError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ShiftError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
