/*!
 * Creation-time window for selecting migration candidates
 *
 * Bounds are written as `YYYY-MM-DD_HH:MM:SS` in the server's local time.
 * A table is a candidate when it was created strictly between the bounds.
 */

use std::fmt;

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone};

use crate::error::{Result, ShiftError};

/// Textual format of window bounds
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// Open interval `(start, end)` of table creation times, in epoch seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationWindow {
    start: i64,
    end: i64,
}

impl MigrationWindow {
    /// Build a window from epoch seconds
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if start >= end {
            return Err(ShiftError::Config(format!(
                "migration window start ({start}) must be before its end ({end})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse both bounds as local time
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::parse_in(start, end, &chrono::Local)
    }

    /// Parse both bounds in the given time zone
    pub fn parse_in<Tz: TimeZone>(start: &str, end: &str, tz: &Tz) -> Result<Self> {
        Self::new(parse_timestamp(start, tz)?, parse_timestamp(end, tz)?)
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    /// `start < created_at < end`
    pub fn contains(&self, created_at: i64) -> bool {
        self.start < created_at && created_at < self.end
    }
}

impl fmt::Display for MigrationWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {})",
            format_timestamp(self.start),
            format_timestamp(self.end)
        )
    }
}

/// Parse a `YYYY-MM-DD_HH:MM:SS` timestamp in `tz` to epoch seconds.
///
/// A wall-clock time that occurs twice (DST fall-back) resolves to the
/// earlier instant; one that never occurs (DST spring-forward) is rejected.
pub fn parse_timestamp<Tz: TimeZone>(text: &str, tz: &Tz) -> Result<i64> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT).map_err(|e| {
        ShiftError::InvalidTimestamp {
            input: text.to_string(),
            reason: format!("{e} (expected YYYY-MM-DD_HH:MM:SS)"),
        }
    })?;

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(at) => Ok(at.timestamp()),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.timestamp()),
        LocalResult::None => Err(ShiftError::InvalidTimestamp {
            input: text.to_string(),
            reason: "time does not exist in the local time zone".to_string(),
        }),
    }
}

/// Render epoch seconds as a local `YYYY-MM-DD_HH:MM:SS` timestamp
pub fn format_timestamp(secs: i64) -> String {
    match DateTime::from_timestamp(secs, 0) {
        Some(at) => at
            .with_timezone(&chrono::Local)
            .format(TIMESTAMP_FORMAT)
            .to_string(),
        None => secs.to_string(),
    }
}
