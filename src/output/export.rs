//! JSON-lines export of harvested contributors
//!
//! Each line carries one project whose pages all succeeded and that the
//! graph merge has not yet taken, with its pages stitched in order. Entries
//! are written as the endpoint returned them.

use crate::contributors::stitch_pages;
use crate::storage::RecordStore;
use crate::HarvestError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One exported line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectContributors {
    pub project_name: String,
    pub contributors: Vec<Value>,
}

/// Counts from one export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub projects: usize,
    pub contributors: usize,
    /// Projects left out because a stored page did not decode
    pub skipped: usize,
}

/// Writes every completed project to `writer`, one JSON object per line
pub fn export_completed<W: Write>(
    storage: &dyn RecordStore,
    mut writer: W,
) -> Result<ExportSummary, HarvestError> {
    let mut summary = ExportSummary::default();

    for project_name in storage.completed_projects()? {
        let pages = storage.contributor_pages(&project_name)?;
        let contributors = match stitch_pages(&pages) {
            Ok(contributors) => contributors,
            Err(e) => {
                tracing::warn!("Skipping '{}': stored payload is not valid: {}", project_name, e);
                summary.skipped += 1;
                continue;
            }
        };

        summary.projects += 1;
        summary.contributors += contributors.len();

        let line = ProjectContributors {
            project_name,
            contributors,
        };
        serde_json::to_writer(&mut writer, &line)
            .map_err(|e| HarvestError::Export(e.to_string()))?;
        writer.write_all(b"\n")?;
    }

    writer.flush()?;
    Ok(summary)
}

/// Exports completed projects to the file at `path`, replacing it
pub fn export_to_file(storage: &dyn RecordStore, path: &Path) -> Result<ExportSummary, HarvestError> {
    let file = File::create(path)?;
    let summary = export_completed(storage, BufWriter::new(file))?;

    tracing::info!(
        "Exported {} projects ({} contributors) to {}",
        summary.projects,
        summary.contributors,
        path.display()
    );
    Ok(summary)
}
