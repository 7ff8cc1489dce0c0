/*!
 * CLI output styling
 *
 * Summary tables and themed messages printed by the `tableshift` binary.
 */

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use console::{style, StyledObject};

use crate::migrate::MigrationReport;
use crate::registry::{RoutingEntry, SwitchOutcome};

// ============================================================================
// THEME
// ============================================================================

/// Colors for consistent styling
pub struct Theme;

impl Theme {
    pub fn primary<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan()
    }

    pub fn success<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).green()
    }

    pub fn warning<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).yellow()
    }

    pub fn error<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).red()
    }

    pub fn muted<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).dim()
    }
}

/// Status icons
pub struct Icons;

impl Icons {
    pub const SUCCESS: &'static str = "✓";
    pub const ERROR: &'static str = "✗";
    pub const WARNING: &'static str = "⚠";
    pub const INFO: &'static str = "ℹ";
    pub const ARROW_RIGHT: &'static str = "→";
}

// ============================================================================
// TABLES
// ============================================================================

/// Create a styled data table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header_cell(text: &str) -> Cell {
    Cell::new(text)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

/// Overall numbers of a migration run
pub fn migration_summary_table(report: &MigrationReport) -> Table {
    let mut table = create_table();
    let title = if report.is_dry_run() {
        "Migration Plan (dry run)"
    } else {
        "Migration Summary"
    };
    table.set_header(vec![header_cell(title), Cell::new("")]);

    table.add_row(vec![Cell::new("Mode"), Cell::new(report.mode.to_string())]);
    table.add_row(vec![
        Cell::new("Tables In Window"),
        Cell::new(report.matched.len().to_string()).add_attribute(Attribute::Bold),
    ]);

    if report.is_dry_run() {
        let summary = report.plan.summary();
        table.add_row(vec![
            Cell::new("Would Create"),
            Cell::new(summary.creates.to_string()).fg(Color::Yellow),
        ]);
        table.add_row(vec![
            Cell::new("Would Copy"),
            Cell::new(summary.copies.to_string()).fg(Color::Yellow),
        ]);
    } else {
        table.add_row(vec![
            Cell::new("Created"),
            Cell::new(report.created.len().to_string())
                .fg(Color::Green)
                .add_attribute(Attribute::Bold),
        ]);
        table.add_row(vec![
            Cell::new("Already Present"),
            Cell::new(report.already_present.len().to_string()),
        ]);
        table.add_row(vec![
            Cell::new("Tables Copied"),
            Cell::new(report.copies.len().to_string()).fg(Color::Green),
        ]);
        table.add_row(vec![
            Cell::new("Records Copied"),
            Cell::new(report.total_records().to_string()).add_attribute(Attribute::Bold),
        ]);
        if report.total_retries() > 0 {
            table.add_row(vec![
                Cell::new("Retries"),
                Cell::new(report.total_retries().to_string()).fg(Color::Yellow),
            ]);
        }
        if !report.unsettled.is_empty() {
            table.add_row(vec![
                Cell::new("Not Settled"),
                Cell::new(report.unsettled.join(", ")).fg(Color::Yellow),
            ]);
        }
    }

    if !report.filtered_out.is_empty() {
        table.add_row(vec![
            Cell::new("Not Copied (filter)"),
            Cell::new(report.filtered_out.len().to_string()).fg(Color::DarkGrey),
        ]);
    }

    table.add_row(vec![
        Cell::new("Duration"),
        Cell::new(format_duration(report.duration.as_secs_f64())),
    ]);

    table
}

/// One row per copied table
pub fn table_copy_table(report: &MigrationReport) -> Table {
    let mut table = create_table();
    table.set_header(vec![
        header_cell("Table"),
        header_cell("Records"),
        header_cell("Retries"),
        header_cell("Duration"),
    ]);

    for copy in &report.copies {
        let retries = if copy.retries > 0 {
            Cell::new(copy.retries.to_string()).fg(Color::Yellow)
        } else {
            Cell::new("0").fg(Color::DarkGrey)
        };
        table.add_row(vec![
            Cell::new(&copy.table),
            Cell::new(copy.records.to_string()),
            retries,
            Cell::new(format_duration(copy.duration.as_secs_f64())),
        ]);
    }

    table
}

/// Before/after view of an ownership switch
pub fn switch_table(outcome: &SwitchOutcome) -> Table {
    let mut table = create_table();
    table.set_header(vec![header_cell(&outcome.path), header_cell("Cluster"), header_cell("Meta Servers")]);

    let row = |label: &str, entry: &RoutingEntry, color: Color| {
        vec![
            Cell::new(label),
            Cell::new(&entry.cluster_name).fg(color).add_attribute(Attribute::Bold),
            Cell::new(&entry.meta_addrs),
        ]
    };
    table.add_row(row("Before", &outcome.previous, Color::DarkGrey));
    table.add_row(row("After", &outcome.current, Color::Green));

    table
}

// ============================================================================
// HELPERS
// ============================================================================

/// Format duration into human-readable string
pub fn format_duration(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining = secs % 60.0;
        format!("{}m {:.0}s", mins, remaining)
    } else {
        let hours = (secs / 3600.0).floor();
        let mins = ((secs % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours, mins)
    }
}

/// Print a styled error message with optional suggestion
pub fn print_error(message: &str, suggestion: Option<&str>) {
    eprintln!(
        "\n{} {}",
        Theme::error(format!("{} Error:", Icons::ERROR)),
        message
    );

    if let Some(hint) = suggestion {
        eprintln!(
            "  {} {}",
            Theme::muted(Icons::ARROW_RIGHT),
            Theme::muted(hint)
        );
    }
    eprintln!();
}

pub fn print_warning(message: &str) {
    eprintln!(
        "{} {}",
        Theme::warning(Icons::WARNING.to_string()),
        Theme::warning(message)
    );
}

pub fn print_success(message: &str) {
    println!(
        "{} {}",
        Theme::success(Icons::SUCCESS.to_string()),
        Theme::success(message)
    );
}

pub fn print_info(message: &str) {
    println!("{} {}", Theme::primary(Icons::INFO.to_string()), message);
}
