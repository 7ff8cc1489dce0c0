//! Scan-and-replicate data copy
//!
//! Every record an unordered scan of the source yields is written to the
//! target with a plain `set`. Each remote call goes through the retry policy,
//! so transient failures only cost time. A scanner is never restarted: an
//! error that cannot be retried ends the whole run.

use std::time::{Duration, Instant};

use tableshift_core_resilience::{CancellationToken, Retried, RetryPolicy};
use tracing::{debug, info};

use crate::cluster::{ClusterClient, ClusterResult, Record, ScanOptions, Scanner, TableHandle};
use crate::error::{Result, ShiftError};

/// How the data copy of one table went
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCopyStats {
    pub table: String,
    pub records: u64,
    /// Retries spent across every call made for this table
    pub retries: u64,
    pub duration: Duration,
}

/// Knobs for one table copy
#[derive(Debug, Clone)]
pub struct CopySettings<'a> {
    pub policy: &'a RetryPolicy,
    pub token: &'a CancellationToken,
    pub scanner_count: usize,
    pub scan: ScanOptions,
    pub progress_interval: u64,
}

struct Copier<'a> {
    table: &'a str,
    settings: &'a CopySettings<'a>,
    retries: u64,
}

impl Copier<'_> {
    fn call<T>(&mut self, operation: &str, op: impl FnMut(u32) -> ClusterResult<T>) -> Result<T> {
        let Retried { value, retries } = self
            .settings
            .policy
            .run(self.settings.token, operation, op)
            .map_err(ShiftError::from_retry)?;
        self.retries += u64::from(retries);
        Ok(value)
    }
}

/// Copy every record of `table` from `source` to `target`
pub fn copy_table(
    source: &dyn ClusterClient,
    target: &dyn ClusterClient,
    table: &str,
    settings: &CopySettings<'_>,
) -> Result<TableCopyStats> {
    let started = Instant::now();
    let mut copier = Copier {
        table,
        settings,
        retries: 0,
    };

    let source_table = copier.call(&format!("open table '{table}' on source"), |_| {
        source.open_table(table)
    })?;
    let target_table = copier.call(&format!("open table '{table}' on target"), |_| {
        target.open_table(table)
    })?;

    let scanners = copier.call(&format!("get scanners of table '{table}'"), |_| {
        source_table.unordered_scanners(settings.scanner_count, &settings.scan)
    })?;
    info!(table, scanners = scanners.len(), "copying table data");

    let mut records = 0_u64;
    for (index, scanner) in scanners.into_iter().enumerate() {
        records += drain(&mut copier, scanner, target_table.as_ref(), index, records)?;
    }

    let stats = TableCopyStats {
        table: table.to_string(),
        records,
        retries: copier.retries,
        duration: started.elapsed(),
    };
    info!(
        table,
        records = stats.records,
        retries = stats.retries,
        elapsed_ms = stats.duration.as_millis() as u64,
        "table copy complete"
    );
    Ok(stats)
}

/// Drive one scanner to completion; returns the records it copied
fn drain(
    copier: &mut Copier<'_>,
    mut scanner: Box<dyn Scanner>,
    target: &dyn TableHandle,
    index: usize,
    copied_before: u64,
) -> Result<u64> {
    let table = copier.table;
    let scan_op = format!("scan table '{table}' (scanner {index})");
    let set_op = format!("set into table '{table}' on target");
    let interval = copier.settings.progress_interval.max(1);
    let mut copied = 0_u64;

    loop {
        if copier.settings.token.is_cancelled() {
            return Err(ShiftError::Cancelled {
                operation: format!("copy of table '{table}'"),
            });
        }

        let record: Option<Record> = copier.call(&scan_op, |_| scanner.next_record())?;
        let Some(record) = record else {
            debug!(table, scanner = index, records = copied, "scanner drained");
            return Ok(copied);
        };

        copier.call(&set_op, |_| {
            target.set(&record.hash_key, &record.sort_key, &record.value)
        })?;
        copied += 1;

        let total = copied_before + copied;
        if total % interval == 0 {
            info!(table, records = total, "copy progress");
        }
    }
}
