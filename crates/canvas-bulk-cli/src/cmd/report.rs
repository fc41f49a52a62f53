//! Summary and failure tables on stderr

use std::fmt::Display;

use canvas_bulk_core::BatchResult;
use canvas_bulk_core::progress::fmt_num;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

/// Failures listed individually before collapsing into a count
const MAX_FAILURE_ROWS: usize = 50;

fn table(header: Vec<Cell>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header);
    table
}

/// Print a key-value summary table on stderr
pub fn print_summary(title: &str, rows: &[(&str, String)]) {
    let mut t = table(vec![
        Cell::new(title).fg(Color::Cyan),
        Cell::new("Value").fg(Color::Cyan),
    ]);
    for (label, value) in rows {
        t.add_row(vec![Cell::new(label), Cell::new(value)]);
    }
    eprintln!("\n{t}");
}

/// Failure table: raw reason plus a status-keyed remediation hint.
pub fn failure_table<I: Display, T>(result: &BatchResult<I, T>) -> Option<Table> {
    if result.failed.is_empty() {
        return None;
    }
    let mut t = table(vec![
        Cell::new("Id").fg(Color::Cyan),
        Cell::new("Status").fg(Color::Cyan),
        Cell::new("Reason").fg(Color::Cyan),
        Cell::new("Hint").fg(Color::Cyan),
    ]);
    for failure in result.failed.iter().take(MAX_FAILURE_ROWS) {
        let status = match (&failure.status, failure.is_network_error) {
            (_, true) => "network".to_string(),
            (Some(status), false) => status.to_string(),
            (None, false) => "-".to_string(),
        };
        t.add_row(vec![
            Cell::new(&failure.id),
            Cell::new(status).fg(Color::Red),
            Cell::new(&failure.reason),
            Cell::new(failure.remediation()),
        ]);
    }
    let hidden = result.failed.len().saturating_sub(MAX_FAILURE_ROWS);
    if hidden > 0 {
        t.add_row(vec![
            Cell::new("..."),
            Cell::new(""),
            Cell::new(format!("and {} more", fmt_num(hidden))),
            Cell::new(""),
        ]);
    }
    Some(t)
}

/// Render a finished (or stopped) bulk run.
pub fn print_result<I: Display, T>(title: &str, result: &BatchResult<I, T>, total: usize) {
    let state = if result.cancelled {
        "stopped early by request"
    } else if result.failed.is_empty() {
        "completed"
    } else {
        "completed with failures"
    };
    print_summary(
        title,
        &[
            ("Result", result.summary_line(total)),
            ("Succeeded", fmt_num(result.successful.len())),
            ("Failed", fmt_num(result.failed.len())),
            (
                "Not started",
                fmt_num(total.saturating_sub(result.processed())),
            ),
            ("State", state.to_string()),
        ],
    );
    if let Some(t) = failure_table(result) {
        eprintln!("\n{t}");
    }
}
