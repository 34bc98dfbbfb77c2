//! Console rendering of state events and transactions.

use valise_core::{Event, EventSink};
use valise_resolver::Transaction;

/// Sink printing events as one-line progress messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::Warning { .. } => eprintln!("WARNING: {event}"),
            _ => println!("{event}"),
        }
    }
}

/// Render a planned transaction the way `--dry-run` prints it.
pub fn print_transaction(transaction: &Transaction) {
    if transaction.is_empty() {
        println!("Nothing to do.");
        return;
    }
    for entry in &transaction.entries {
        let mut line = format!("{} {}", entry.action, entry.record.pkgver);
        if let Some(previous) = &entry.previous {
            line.push_str(&format!(" (replaces {previous})"));
        }
        if let Some(repository) = &entry.repository {
            line.push_str(&format!(" [{repository}]"));
        }
        println!("{line}");
    }
    println!(
        "{} operations: {} to download, {} net installed",
        transaction.entries.len(),
        human_size(transaction.total_download_size as i64),
        human_size(transaction.total_installed_size)
    );
}

/// Render byte counts the way humans read them.
pub fn human_size(bytes: i64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let negative = bytes < 0;
    let mut value = bytes.unsigned_abs() as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let sign = if negative { "-" } else { "" };
    if unit == 0 {
        format!("{sign}{} {}", value as u64, UNITS[unit])
    } else {
        format!("{sign}{value:.1} {}", UNITS[unit])
    }
}
