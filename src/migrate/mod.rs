/*!
 * Migration orchestrator
 *
 * Moves the tables a source cluster created inside a time window to a target
 * cluster in two phases:
 *
 * 1. Provisioning: create each candidate on the target
 * 2. Copy: scan every record of the selected tables and write it to the target
 *
 * Tables are handled one at a time in listing order. Transient remote errors
 * are retried under the configured policy; the run stops on the first error
 * that cannot be retried, on cancellation, or at its deadline.
 */

pub mod filter;
pub mod provision;
pub mod replicate;

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tableshift_core_resilience::{CancellationToken, RetryPolicy};
use tracing::{info, warn};

use crate::cluster::{ClusterClient, ScanOptions};
use crate::config::MigrationConfig;
use crate::dry_run::DryRunPlan;
use crate::error::Result;
use crate::window::MigrationWindow;

use self::filter::TableFilter;
use self::replicate::CopySettings;

pub use self::provision::ProvisionOutcome;
pub use self::replicate::TableCopyStats;

/// Which phases a run performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationMode {
    /// Create tables on the target, copy nothing
    Provision,
    /// Create tables, then copy their data
    #[default]
    Full,
    /// Copy data into tables a previous run provisioned
    CopyOnly,
}

impl MigrationMode {
    pub fn provisions(self) -> bool {
        matches!(self, MigrationMode::Provision | MigrationMode::Full)
    }

    pub fn copies(self) -> bool {
        matches!(self, MigrationMode::Full | MigrationMode::CopyOnly)
    }
}

impl fmt::Display for MigrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationMode::Provision => write!(f, "provision"),
            MigrationMode::Full => write!(f, "full"),
            MigrationMode::CopyOnly => write!(f, "copy-only"),
        }
    }
}

/// Everything a run did, or would have done in a dry run
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub mode: MigrationMode,
    /// Tables inside the window, in listing order
    pub matched: Vec<String>,
    pub created: Vec<String>,
    pub already_present: Vec<String>,
    /// Created tables that were not serviceable when settling timed out
    pub unsettled: Vec<String>,
    /// Matched tables the copy filter left out
    pub filtered_out: Vec<String>,
    pub copies: Vec<TableCopyStats>,
    pub plan: DryRunPlan,
    pub duration: Duration,
}

impl MigrationReport {
    fn new(mode: MigrationMode, dry_run: bool) -> Self {
        Self {
            mode,
            matched: Vec::new(),
            created: Vec::new(),
            already_present: Vec::new(),
            unsettled: Vec::new(),
            filtered_out: Vec::new(),
            copies: Vec::new(),
            plan: DryRunPlan::new(dry_run),
            duration: Duration::ZERO,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.plan.is_enabled()
    }

    pub fn total_records(&self) -> u64 {
        self.copies.iter().map(|c| c.records).sum()
    }

    pub fn total_retries(&self) -> u64 {
        self.copies.iter().map(|c| c.retries).sum()
    }
}

/// Runs migrations with one configuration, retry policy and cancellation token
#[derive(Debug, Clone)]
pub struct Migrator {
    config: MigrationConfig,
    filter: TableFilter,
    policy: RetryPolicy,
    token: CancellationToken,
}

impl Migrator {
    /// Validate `config` and compile its copy filter
    pub fn new(config: MigrationConfig) -> Result<Self> {
        config.validate()?;
        let filter = TableFilter::new(&config.copy_include, &config.copy_exclude)?;
        let policy = config.retry.policy();
        let token = match config.timeout_secs {
            Some(secs) => CancellationToken::with_timeout(Duration::from_secs(secs)),
            None => CancellationToken::new(),
        };

        Ok(Self {
            config,
            filter,
            policy,
            token,
        })
    }

    /// Replace the cancellation token (and with it any configured deadline)
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Handle that cancels this migrator's runs
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Migrate the tables `source` created inside `window` to `target`.
    ///
    /// A dry run lists the source and records the plan but never calls the
    /// target. Modes that copy fail before touching either cluster unless
    /// `copy_include` names the tables to copy.
    pub fn migrate_tables(
        &self,
        source: &dyn ClusterClient,
        target: &dyn ClusterClient,
        window: &MigrationWindow,
        mode: MigrationMode,
        dry_run: bool,
    ) -> Result<MigrationReport> {
        if mode.copies() {
            self.config.validate_copy_rules()?;
        }

        let started = Instant::now();
        let mut report = MigrationReport::new(mode, dry_run);
        info!(%mode, dry_run, window = %window, "starting migration");

        let candidates = provision::select_candidates(source, window)?;
        report.matched = candidates.iter().map(|t| t.name.clone()).collect();

        if mode.provisions() {
            let outcome = provision::provision(
                target,
                &candidates,
                &self.config,
                &self.token,
                &mut report.plan,
            )?;
            report.created = outcome.created;
            report.already_present = outcome.already_present;
            info!(
                created = report.created.len(),
                already_present = report.already_present.len(),
                "provisioning finished"
            );
        }

        if mode.copies() {
            let (selected, filtered_out): (Vec<String>, Vec<String>) = report
                .matched
                .iter()
                .cloned()
                .partition(|name| self.filter.should_copy(name));
            for name in &filtered_out {
                report.plan.record_skip(name, "excluded by copy filter");
            }
            report.filtered_out = filtered_out;

            if dry_run {
                for name in &selected {
                    report.plan.record_copy(name);
                }
            } else {
                report.unsettled =
                    provision::settle(target, &report.created, &self.config.settle, &self.token)?;
                for name in &report.unsettled {
                    warn!(table = %name, "copying into a table that may not be serviceable yet");
                }

                let settings = CopySettings {
                    policy: &self.policy,
                    token: &self.token,
                    scanner_count: self.config.scanner_count,
                    scan: ScanOptions {
                        batch_size: self.config.scan_batch_size,
                        timeout_ms: self.config.scan_timeout_ms,
                    },
                    progress_interval: self.config.progress_interval,
                };
                for name in &selected {
                    let stats = replicate::copy_table(source, target, name, &settings)?;
                    report.copies.push(stats);
                }
            }
        }

        if dry_run {
            let summary = report.plan.summary();
            info!(
                target: "dry_run",
                creates = summary.creates,
                copies = summary.copies,
                skips = summary.skips,
                "[DRY-RUN] plan complete, target untouched"
            );
        } else if let Err(e) = target.flush() {
            warn!(error = %e, "failed to flush target cluster state");
        }

        report.duration = started.elapsed();
        info!(
            matched = report.matched.len(),
            created = report.created.len(),
            copied_tables = report.copies.len(),
            records = report.total_records(),
            retries = report.total_retries(),
            elapsed_ms = report.duration.as_millis() as u64,
            "migration finished"
        );
        Ok(report)
    }
}
