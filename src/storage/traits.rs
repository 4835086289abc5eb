//! Storage traits and error types
//!
//! This module defines the record store interface the orchestrator and
//! output layers depend on, and its error type.

use crate::storage::{FetchRecord, FetchStatus, RunRecord, RunStatus, StatusCounts};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Record ({project_name}, page {page}) already exists")]
    Duplicate { project_name: String, page: u32 },

    #[error("Invalid table name: '{0}'")]
    InvalidTableName(String),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Record store lock poisoned")]
    LockPoisoned,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable per-page fetch status, keyed by `(project_name, page)`
///
/// A store is bound to one table when opened; every operation acts on it.
pub trait RecordStore {
    /// Name of the bound fetch-record table
    fn table(&self) -> &str;

    /// Creates the bound table and run bookkeeping if missing
    fn ensure_table(&mut self) -> StorageResult<()>;

    // ===== Work Items =====

    /// Seeds each name as a pending page-1 record
    ///
    /// Names already present are left untouched. Returns how many were
    /// inserted.
    fn seed_projects(&mut self, names: &[String]) -> StorageResult<usize>;

    /// Up to `limit` distinct pending project names, lexicographically
    fn select_pending(&self, limit: usize) -> StorageResult<Vec<String>>;

    // ===== Fetch Records =====

    /// Overwrites an existing record in place
    ///
    /// Returns `false` when no row with the record's key exists.
    fn update_fetch_record(&mut self, record: &FetchRecord) -> StorageResult<bool>;

    /// Inserts a new record
    ///
    /// An existing key is reported as [`StorageError::Duplicate`].
    fn insert_fetch_record(&mut self, record: &FetchRecord) -> StorageResult<()>;

    /// Writes a record whichever way its key requires
    ///
    /// Page 1 updates the seeded row (inserting if the project was never
    /// seeded); later pages insert, falling back to an update when a
    /// previous attempt already created the row.
    fn upsert_fetch_record(&mut self, record: &FetchRecord) -> StorageResult<()> {
        if record.page == 1 {
            if self.update_fetch_record(record)? {
                return Ok(());
            }
            return self.insert_fetch_record(record);
        }

        match self.insert_fetch_record(record) {
            Err(StorageError::Duplicate { .. }) => {
                tracing::debug!(
                    "Page {} of '{}' already recorded, updating in place",
                    record.page,
                    record.project_name
                );
                self.update_fetch_record(record).map(|_| ())
            }
            other => other,
        }
    }

    /// Returns a project to the pending pool
    ///
    /// Drops every page after the first and clears page 1 back to pending,
    /// so the next batch fetches the project from the start.
    fn reset_project(&mut self, project_name: &str) -> StorageResult<()>;

    /// All records of a project, ordered by page
    fn get_fetch_records(&self, project_name: &str) -> StorageResult<Vec<FetchRecord>>;

    /// Raw payloads of a project's succeeded pages, in page order
    fn contributor_pages(&self, project_name: &str) -> StorageResult<Vec<Vec<u8>>> {
        let pages = self
            .get_fetch_records(project_name)?
            .into_iter()
            .filter_map(|record| match record.status {
                FetchStatus::Succeeded { contributors } => Some(contributors),
                _ => None,
            })
            .collect();
        Ok(pages)
    }

    /// Projects whose every page succeeded and that are not yet merged
    ///
    /// Stored pages must also run contiguously from 1.
    fn completed_projects(&self) -> StorageResult<Vec<String>>;

    // ===== Statistics =====

    fn count_by_status(&self) -> StorageResult<StatusCounts>;

    // ===== Run Management =====

    /// Creates a new run and returns its ID
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Finishes a run with its final status and written-record count
    fn complete_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        records_written: u64,
    ) -> StorageResult<()>;

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    fn latest_run(&self) -> StorageResult<Option<RunRecord>>;
}
