//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the RecordStore trait.

use crate::storage::schema::{initialize_schema, validate_table_name};
use crate::storage::traits::{RecordStore, StorageError, StorageResult};
use crate::storage::{FetchRecord, FetchStatus, RunRecord, RunStatus, StatusCounts};
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::time::Duration;

/// SQLite storage backend bound to one fetch-record table
pub struct SqliteStorage {
    conn: Connection,
    table: String,
}

impl SqliteStorage {
    /// Opens (or creates) the database at `path` and prepares `table`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `table` - Fetch-record table name; must be a plain identifier
    /// * `busy_timeout` - How long a write waits on a competing writer
    pub fn new(path: &Path, table: &str, busy_timeout: Duration) -> StorageResult<Self> {
        validate_table_name(table)?;
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        conn.busy_timeout(busy_timeout)?;

        initialize_schema(&conn, table)?;

        Ok(Self {
            conn,
            table: table.to_string(),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory(table: &str) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn, table)?;
        Ok(Self {
            conn,
            table: table.to_string(),
        })
    }

    fn read_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
        Ok(RunRecord {
            id: row.get(0)?,
            table_name: row.get(1)?,
            started_at: row.get(2)?,
            finished_at: row.get(3)?,
            config_hash: row.get(4)?,
            status: RunStatus::from_db_string(&row.get::<_, String>(5)?)
                .unwrap_or(RunStatus::Running),
            records_written: row.get::<_, i64>(6)?.max(0) as u64,
        })
    }
}

/// True for a primary-key or unique constraint violation
fn is_duplicate_key(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
        }
        _ => false,
    }
}

impl RecordStore for SqliteStorage {
    fn table(&self) -> &str {
        &self.table
    }

    fn ensure_table(&mut self) -> StorageResult<()> {
        initialize_schema(&self.conn, &self.table)
    }

    // ===== Work Items =====

    fn seed_projects(&mut self, names: &[String]) -> StorageResult<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO {} (project_name, page) VALUES (?1, 1)",
                self.table
            ))?;

            for name in names {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                inserted += stmt.execute(params![name])?;
            }
        }
        tx.commit()?;

        Ok(inserted)
    }

    fn select_pending(&self, limit: usize) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT project_name FROM {}
             WHERE api_has_been_queried IS NULL
             GROUP BY project_name
             ORDER BY project_name
             LIMIT ?1",
            self.table
        ))?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let names = stmt
            .query_map(params![limit], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(names)
    }

    // ===== Fetch Records =====

    fn update_fetch_record(&mut self, record: &FetchRecord) -> StorageResult<bool> {
        let rows = self.conn.execute(
            &format!(
                "UPDATE {}
                 SET api_has_been_queried = ?1,
                     api_query_succeeded = ?2,
                     execution_error = ?3,
                     contributors = ?4,
                     ts = ?5
                 WHERE project_name = ?6 AND page = ?7",
                self.table
            ),
            params![
                record.status.queried(),
                record.status.succeeded(),
                record.status.error(),
                record.status.payload(),
                record.ts,
                record.project_name,
                record.page,
            ],
        )?;

        Ok(rows > 0)
    }

    fn insert_fetch_record(&mut self, record: &FetchRecord) -> StorageResult<()> {
        let result = self.conn.execute(
            &format!(
                "INSERT INTO {} (
                    project_name, page, api_has_been_queried, api_query_succeeded,
                    execution_error, contributors, ts
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                self.table
            ),
            params![
                record.project_name,
                record.page,
                record.status.queried(),
                record.status.succeeded(),
                record.status.error(),
                record.status.payload(),
                record.ts,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(StorageError::Duplicate {
                project_name: record.project_name.clone(),
                page: record.page,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn reset_project(&mut self, project_name: &str) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            &format!(
                "DELETE FROM {} WHERE project_name = ?1 AND page > 1",
                self.table
            ),
            params![project_name],
        )?;
        tx.execute(
            &format!(
                "INSERT INTO {} (project_name, page) VALUES (?1, 1)
                 ON CONFLICT (project_name, page) DO UPDATE
                 SET api_has_been_queried = NULL,
                     api_query_succeeded = NULL,
                     execution_error = NULL,
                     contributors = NULL,
                     ts = NULL",
                self.table
            ),
            params![project_name],
        )?;
        tx.commit()?;

        Ok(())
    }

    fn get_fetch_records(&self, project_name: &str) -> StorageResult<Vec<FetchRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT project_name, page, api_has_been_queried, api_query_succeeded,
                    execution_error, contributors, ts
             FROM {}
             WHERE project_name = ?1
             ORDER BY page",
            self.table
        ))?;

        let records = stmt
            .query_map(params![project_name], |row| {
                Ok(FetchRecord {
                    project_name: row.get(0)?,
                    page: row.get(1)?,
                    status: FetchStatus::from_columns(
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ),
                    ts: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn completed_projects(&self) -> StorageResult<Vec<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT project_name FROM {}
             GROUP BY project_name
             HAVING SUM(CASE WHEN api_has_been_queried = 1 AND api_query_succeeded = 1
                             THEN 0 ELSE 1 END) = 0
                AND MIN(page) = 1
                AND MAX(page) = COUNT(*)
                AND MAX(merge_contributors_succeeded) IS NULL
             ORDER BY project_name",
            self.table
        ))?;

        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(names)
    }

    // ===== Statistics =====

    fn count_by_status(&self) -> StorageResult<StatusCounts> {
        let (records, pending, succeeded, failed): (i64, i64, i64, i64) = self.conn.query_row(
            &format!(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN api_has_been_queried IS NULL THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN api_has_been_queried = 1 AND api_query_succeeded = 1
                                          THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN api_has_been_queried = 1
                                          AND COALESCE(api_query_succeeded, 0) = 0
                                          THEN 1 ELSE 0 END), 0)
                 FROM {}",
                self.table
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let (projects, pending_projects, merged_projects): (i64, i64, i64) = self.conn.query_row(
            &format!(
                "SELECT COUNT(DISTINCT project_name),
                        COUNT(DISTINCT CASE WHEN api_has_been_queried IS NULL
                                            THEN project_name END),
                        COUNT(DISTINCT CASE WHEN merge_contributors_succeeded = 1
                                            THEN project_name END)
                 FROM {}",
                self.table
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(StatusCounts {
            projects: projects as u64,
            pending_projects: pending_projects as u64,
            merged_projects: merged_projects as u64,
            records: records as u64,
            pending: pending as u64,
            succeeded: succeeded as u64,
            failed: failed as u64,
        })
    }

    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO harvest_runs (table_name, started_at, config_hash, status)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                self.table,
                now,
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn complete_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        records_written: u64,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let rows = self.conn.execute(
            "UPDATE harvest_runs SET status = ?1, finished_at = ?2, records_written = ?3
             WHERE id = ?4",
            params![
                status.to_db_string(),
                now,
                i64::try_from(records_written).unwrap_or(i64::MAX),
                run_id
            ],
        )?;

        if rows == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let mut stmt = self.conn.prepare(
            "SELECT id, table_name, started_at, finished_at, config_hash, status, records_written
             FROM harvest_runs WHERE id = ?1",
        )?;

        stmt.query_row(params![run_id], Self::read_run)
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, table_name, started_at, finished_at, config_hash, status, records_written
             FROM harvest_runs WHERE table_name = ?1 ORDER BY id DESC LIMIT 1",
        )?;

        let run = stmt
            .query_row(params![self.table], Self::read_run)
            .optional()?;

        Ok(run)
    }
}
