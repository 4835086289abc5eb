//! Statistics from the record store
//!
//! This module provides functionality for extracting and displaying
//! harvest progress from the storage layer.

use crate::storage::{RecordStore, RunRecord, StatusCounts};
use crate::HarvestError;
use std::fmt::Write;

/// Harvest progress summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Fetch-record table the numbers describe
    pub table: String,

    /// Record and project counts by state
    pub counts: StatusCounts,

    /// Projects ready for the graph merge
    pub completed_projects: u64,

    /// Most recent run against this table, if any
    pub latest_run: Option<RunRecord>,
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The record store to query
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn RecordStore) -> Result<HarvestStatistics, HarvestError> {
    let counts = storage.count_by_status()?;
    let completed_projects = storage.completed_projects()?.len() as u64;
    let latest_run = storage.latest_run()?;

    Ok(HarvestStatistics {
        table: storage.table().to_string(),
        counts,
        completed_projects,
        latest_run,
    })
}

fn percentage(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        (part as f64 / whole as f64) * 100.0
    } else {
        0.0
    }
}

/// Renders statistics as the text [`print_statistics`] shows
pub fn format_statistics(stats: &HarvestStatistics) -> String {
    let counts = &stats.counts;
    let mut out = String::new();

    // Writing to a String cannot fail
    let _ = writeln!(out, "=== Harvest Statistics ({}) ===\n", stats.table);

    let _ = writeln!(out, "Projects:");
    let _ = writeln!(out, "  Total: {}", counts.projects);
    let _ = writeln!(
        out,
        "  Pending: {} ({:.1}%)",
        counts.pending_projects,
        percentage(counts.pending_projects, counts.projects)
    );
    let _ = writeln!(out, "  Ready for merge: {}", stats.completed_projects);
    let _ = writeln!(out, "  Merged: {}", counts.merged_projects);
    let _ = writeln!(out);

    let _ = writeln!(out, "Fetch Records:");
    let _ = writeln!(out, "  Total: {}", counts.records);
    for (label, count) in [
        ("Pending", counts.pending),
        ("Succeeded", counts.succeeded),
        ("Failed", counts.failed),
    ] {
        let _ = writeln!(
            out,
            "  {}: {} ({:.1}%)",
            label,
            count,
            percentage(count, counts.records)
        );
    }
    let _ = writeln!(out);

    match &stats.latest_run {
        Some(run) => {
            let _ = writeln!(out, "Latest Run:");
            let _ = writeln!(out, "  ID: {}", run.id);
            let _ = writeln!(out, "  Status: {}", run.status.to_db_string());
            let _ = writeln!(out, "  Started: {}", run.started_at);
            if let Some(finished) = &run.finished_at {
                let _ = writeln!(out, "  Finished: {}", finished);
            }
            let _ = writeln!(out, "  Records written: {}", run.records_written);
            let _ = writeln!(out, "  Config hash: {}", run.config_hash);
        }
        None => {
            let _ = writeln!(out, "No runs recorded yet");
        }
    }

    out
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    print!("{}", format_statistics(stats));
}
