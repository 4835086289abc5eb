//! Output module for reporting harvest progress
//!
//! This module handles:
//! - Printing record store statistics
//! - Exporting completed projects as JSON lines for the graph merge

pub mod export;
pub mod stats;

pub use export::{export_completed, export_to_file, ExportSummary, ProjectContributors};
pub use stats::{format_statistics, load_statistics, print_statistics, HarvestStatistics};
