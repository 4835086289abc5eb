//! Harvest module for batch orchestration
//!
//! This module drives one batch end to end:
//! - Selecting pending project names from the record store
//! - Walking each project's pages through the rate-limited client
//! - Persisting every page as soon as it arrives
//! - Stopping cleanly between projects on shutdown

mod orchestrator;

pub use orchestrator::{BatchReport, Harvester, ShutdownSignal};
