//! Table provisioning on the target cluster
//!
//! Creating a table that already exists is not an error, so provisioning can
//! be rerun after an interrupted migration.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tableshift_core_resilience::CancellationToken;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterClient, TableInfo, TableStatus};
use crate::config::{MigrationConfig, SettleConfig};
use crate::dry_run::DryRunPlan;
use crate::error::{Result, ShiftError};
use crate::window::{format_timestamp, MigrationWindow};

/// What provisioning did on the target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionOutcome {
    /// Tables this run created
    pub created: Vec<String>,
    /// Tables the target already had
    pub already_present: Vec<String>,
}

/// Available source tables created inside `window`, in listing order
pub fn select_candidates(
    source: &dyn ClusterClient,
    window: &MigrationWindow,
) -> Result<Vec<TableInfo>> {
    let tables = source
        .list_tables(TableStatus::Available)
        .map_err(|e| ShiftError::cluster("list tables on source cluster", e))?;
    let total = tables.len();

    let candidates: Vec<TableInfo> = tables
        .into_iter()
        .filter(|table| {
            let inside = window.contains(table.created_at);
            if !inside {
                debug!(
                    table = %table.name,
                    created_at = %format_timestamp(table.created_at),
                    "outside migration window"
                );
            }
            inside
        })
        .collect();

    info!(
        total,
        matched = candidates.len(),
        window = %window,
        "selected migration candidates"
    );
    Ok(candidates)
}

/// Partition count and envs a table is created with on the target
pub fn creation_spec(table: &TableInfo, config: &MigrationConfig) -> (u32, BTreeMap<String, String>) {
    let partition_count = if config.preserve_partition_count && table.partition_count > 0 {
        table.partition_count
    } else {
        config.default_partition_count
    };
    let envs = if config.preserve_envs {
        table.envs.clone()
    } else {
        BTreeMap::new()
    };
    (partition_count, envs)
}

/// Create every candidate on the target, or only record the plan in a dry run
pub fn provision(
    target: &dyn ClusterClient,
    candidates: &[TableInfo],
    config: &MigrationConfig,
    token: &CancellationToken,
    plan: &mut DryRunPlan,
) -> Result<ProvisionOutcome> {
    let mut outcome = ProvisionOutcome::default();

    for table in candidates {
        if token.is_cancelled() {
            return Err(ShiftError::Cancelled {
                operation: "provisioning".to_string(),
            });
        }

        let (partition_count, envs) = creation_spec(table, config);

        if plan.is_enabled() {
            plan.record_create(&table.name, partition_count, table.created_at);
            continue;
        }

        match target.create_table(&table.name, &envs, partition_count) {
            Ok(()) => {
                info!(
                    table = %table.name,
                    partition_count,
                    created_at = %format_timestamp(table.created_at),
                    "created table on target"
                );
                outcome.created.push(table.name.clone());

                if !token.sleep(config.creation_pause()) {
                    return Err(ShiftError::Cancelled {
                        operation: "provisioning".to_string(),
                    });
                }
            }
            Err(e) if e.is_already_exists() => {
                info!(table = %table.name, "table already exists on target");
                outcome.already_present.push(table.name.clone());
            }
            Err(e) => {
                return Err(ShiftError::cluster(
                    format!("create table '{}' on target cluster", table.name),
                    e,
                ));
            }
        }
    }

    Ok(outcome)
}

/// Wait until freshly created tables can be opened on the target.
///
/// Returns the tables that were still not serviceable when polling timed out;
/// copying goes ahead for them anyway and relies on retries.
pub fn settle(
    target: &dyn ClusterClient,
    created: &[String],
    config: &SettleConfig,
    token: &CancellationToken,
) -> Result<Vec<String>> {
    if created.is_empty() {
        return Ok(Vec::new());
    }

    if !config.poll {
        let delay = Duration::from_secs(config.fixed_delay_secs);
        info!(delay_secs = config.fixed_delay_secs, "waiting for created tables to settle");
        if !token.sleep(delay) {
            return Err(ShiftError::Cancelled {
                operation: "settle wait".to_string(),
            });
        }
        return Ok(Vec::new());
    }

    let interval = Duration::from_secs(config.poll_interval_secs);
    let started = Instant::now();
    let timeout = Duration::from_secs(config.timeout_secs);
    let mut unsettled = Vec::new();

    for table in created {
        loop {
            match target.open_table(table) {
                Ok(_) => {
                    debug!(table = %table, "table is serviceable");
                    break;
                }
                Err(e) if started.elapsed() >= timeout => {
                    warn!(
                        table = %table,
                        error = %e,
                        timeout_secs = config.timeout_secs,
                        "table not serviceable before settle timeout, continuing"
                    );
                    unsettled.push(table.clone());
                    break;
                }
                Err(e) => {
                    debug!(table = %table, error = %e, "table not serviceable yet");
                    if !token.sleep(interval) {
                        return Err(ShiftError::Cancelled {
                            operation: "settle wait".to_string(),
                        });
                    }
                }
            }
        }
    }

    Ok(unsettled)
}
