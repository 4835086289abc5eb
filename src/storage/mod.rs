//! Storage module for persisting fetch progress
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite database initialization and schema management
//! - Seeding work items and selecting pending ones
//! - Per-page fetch record updates and inserts
//! - Run tracking for each orchestrator invocation

mod schema;
mod sqlite;
mod traits;

pub use schema::validate_table_name;
pub use sqlite::SqliteStorage;
pub use traits::{RecordStore, StorageError, StorageResult};

use crate::fetcher::FetchOutcome;
use chrono::Utc;

/// Persisted result of one page of one project's fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRecord {
    pub project_name: String,
    /// 1-based; pages of a project are contiguous
    pub page: u32,
    pub status: FetchStatus,
    /// RFC 3339 time of the last write
    pub ts: Option<String>,
}

impl FetchRecord {
    /// Record for a page that has just been fetched
    pub fn from_outcome(project_name: &str, page: u32, outcome: &FetchOutcome) -> Self {
        let status = match outcome {
            FetchOutcome::Success(body) => FetchStatus::Succeeded {
                contributors: body.clone(),
            },
            FetchOutcome::Failure(failure) => FetchStatus::Failed {
                error: failure.describe(),
            },
        };

        Self {
            project_name: project_name.to_string(),
            page,
            status,
            ts: Some(Utc::now().to_rfc3339()),
        }
    }
}

/// Fetch state of a record
///
/// The variants make the column invariant structural: once queried,
/// exactly one of payload and error is present.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchStatus {
    /// Not yet attempted (`api_has_been_queried IS NULL`)
    Pending,

    /// Raw response payload stored in `contributors`
    Succeeded { contributors: Vec<u8> },

    /// Description stored in `execution_error`
    Failed { error: String },
}

impl FetchStatus {
    /// `api_has_been_queried` column value
    pub fn queried(&self) -> Option<bool> {
        match self {
            Self::Pending => None,
            _ => Some(true),
        }
    }

    /// `api_query_succeeded` column value
    pub fn succeeded(&self) -> Option<bool> {
        match self {
            Self::Pending => None,
            Self::Succeeded { .. } => Some(true),
            Self::Failed { .. } => Some(false),
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error } => Some(error),
            _ => None,
        }
    }

    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Self::Succeeded { contributors } => Some(contributors),
            _ => None,
        }
    }

    /// Rebuilds the status from raw column values
    pub fn from_columns(
        queried: Option<bool>,
        succeeded: Option<bool>,
        error: Option<String>,
        payload: Option<Vec<u8>>,
    ) -> Self {
        match (queried, succeeded) {
            (Some(true), Some(true)) => Self::Succeeded {
                contributors: payload.unwrap_or_default(),
            },
            (Some(true), _) => Self::Failed {
                error: error.unwrap_or_default(),
            },
            _ => Self::Pending,
        }
    }
}

/// Record counts by fetch state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    /// Distinct project names in the table
    pub projects: u64,
    /// Projects with at least one pending record
    pub pending_projects: u64,
    /// Projects whose merge into the graph store was flagged as succeeded
    pub merged_projects: u64,
    pub records: u64,
    pub pending: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Represents one orchestrator invocation
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub table_name: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub records_written: u64,
}

/// Status of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
