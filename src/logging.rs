/*!
 * Tracing setup for tableshift runs
 *
 * Three targets carry the events of a run:
 * - `tableshift`: provisioning, copy progress and routing writes
 * - `tableshift_core_resilience`: one WARN per retried data-plane call
 * - `dry_run`: the `[DRY-RUN]` plan lines
 *
 * All three follow the configured level unless `RUST_LOG` is set. Console
 * output goes to stderr so the summary tables on stdout stay pipeable; with
 * `log_file` set, events are written as JSON lines instead.
 */

use std::fs::File;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::ShiftConfig;
use crate::error::{Result, ShiftError};

/// Targets a run emits events under
pub const LOG_TARGETS: [&str; 3] = ["tableshift", "tableshift_core_resilience", "dry_run"];

/// Level the crate logs at for `config`
pub fn effective_level(config: &ShiftConfig) -> Level {
    if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    }
}

/// One `target=level` directive per entry of [`LOG_TARGETS`]
pub fn filter_directives(level: Level) -> String {
    LOG_TARGETS
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber for `config`
pub fn init_logging(config: &ShiftConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directives(effective_level(config))))
        .map_err(|e| ShiftError::Config(format!("Failed to create log filter: {}", e)))?;

    match config.log_file {
        Some(ref log_path) => init_json_logging(log_path, env_filter),
        None => {
            init_console_logging(env_filter);
            Ok(())
        }
    }
}

fn init_console_logging(env_filter: EnvFilter) {
    let fmt_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// JSON lines to `log_path`, truncated at start-up
fn init_json_logging(log_path: &Path, env_filter: EnvFilter) -> Result<()> {
    let file = File::create(log_path).map_err(|e| {
        ShiftError::Config(format!(
            "Failed to create log file {}: {}",
            log_path.display(),
            e
        ))
    })?;

    let fmt_layer = fmt::layer()
        .with_writer(file)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_verbose_overrides_log_level() {
        let config = ShiftConfig {
            log_level: LogLevel::Error,
            verbose: true,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::DEBUG);

        let config = ShiftConfig {
            log_level: LogLevel::Warn,
            ..Default::default()
        };
        assert_eq!(effective_level(&config), Level::WARN);
    }

    #[test]
    fn test_filter_covers_every_target() {
        let directives = filter_directives(Level::INFO);
        assert_eq!(
            directives,
            "tableshift=INFO,tableshift_core_resilience=INFO,dry_run=INFO"
        );
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn test_unwritable_log_file_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("no-such-dir").join("run.log");
        let config = ShiftConfig {
            log_file: Some(missing),
            ..Default::default()
        };
        assert!(matches!(init_logging(&config), Err(ShiftError::Config(_))));
    }
}
