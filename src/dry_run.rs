/*!
 * Dry-run plan recording
 *
 * During a dry run the orchestrator enumerates what it would do and records
 * it here instead of touching the target cluster.
 */

use tracing::{debug, info};

use crate::window::format_timestamp;

/// Dry-run operation tracker
#[derive(Debug, Clone, Default)]
pub struct DryRunPlan {
    enabled: bool,
    actions: Vec<PlannedAction>,
}

/// Actions a real run would take
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    CreateTable {
        table: String,
        partition_count: u32,
        created_at: i64,
    },
    CopyTable {
        table: String,
    },
    SkipTable {
        table: String,
        reason: String,
    },
}

/// Counts per action kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DryRunSummary {
    pub creates: usize,
    pub copies: usize,
    pub skips: usize,
}

impl DryRunPlan {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            actions: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a table creation on the target
    pub fn record_create(&mut self, table: &str, partition_count: u32, created_at: i64) {
        if !self.enabled {
            return;
        }

        info!(
            target: "dry_run",
            "[DRY-RUN] Would create table: {} ({} partitions, created on source {})",
            table,
            partition_count,
            format_timestamp(created_at)
        );

        self.actions.push(PlannedAction::CreateTable {
            table: table.to_string(),
            partition_count,
            created_at,
        });
    }

    /// Record a table data copy
    pub fn record_copy(&mut self, table: &str) {
        if !self.enabled {
            return;
        }

        info!(target: "dry_run", "[DRY-RUN] Would copy data of table: {}", table);

        self.actions.push(PlannedAction::CopyTable {
            table: table.to_string(),
        });
    }

    /// Record a table left out of the run
    pub fn record_skip(&mut self, table: &str, reason: &str) {
        if !self.enabled {
            return;
        }

        debug!(target: "dry_run", "[DRY-RUN] Would skip: {} - {}", table, reason);

        self.actions.push(PlannedAction::SkipTable {
            table: table.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn actions(&self) -> &[PlannedAction] {
        &self.actions
    }

    pub fn summary(&self) -> DryRunSummary {
        let mut summary = DryRunSummary::default();
        for action in &self.actions {
            match action {
                PlannedAction::CreateTable { .. } => summary.creates += 1,
                PlannedAction::CopyTable { .. } => summary.copies += 1,
                PlannedAction::SkipTable { .. } => summary.skips += 1,
            }
        }
        summary
    }
}
