//! Database schema definitions
//!
//! The fetch-record table is named on the command line, so its DDL is
//! rendered per table after the name has been validated.

use crate::storage::traits::{StorageError, StorageResult};

/// Run bookkeeping, shared by every fetch-record table in the database
pub const RUNS_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS harvest_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    table_name TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    records_written INTEGER NOT NULL DEFAULT 0
);
"#;

/// Longest accepted table name
const MAX_TABLE_NAME_LEN: usize = 64;

/// Checks that `name` is a plain SQL identifier
///
/// The name is interpolated into SQL text, so only ASCII letters, digits
/// and underscores are accepted, starting with a letter or underscore.
pub fn validate_table_name(name: &str) -> StorageResult<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);

    if !valid_start
        || name.len() > MAX_TABLE_NAME_LEN
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        || name.to_ascii_lowercase().starts_with("sqlite_")
        || name.eq_ignore_ascii_case("harvest_runs")
    {
        return Err(StorageError::InvalidTableName(name.to_string()));
    }

    Ok(())
}

/// DDL for a fetch-record table
pub fn fetch_table_sql(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    project_name TEXT NOT NULL,
    page INTEGER NOT NULL DEFAULT 1 CHECK (page >= 1),
    api_has_been_queried INTEGER,
    api_query_succeeded INTEGER,
    execution_error TEXT,
    contributors BLOB,
    ts TEXT,
    merge_contributors_succeeded INTEGER,
    PRIMARY KEY (project_name, page)
);

CREATE INDEX IF NOT EXISTS idx_{table}_pending ON {table}(api_has_been_queried, project_name);
"#,
        table = table
    )
}

/// Initializes the schema for `table`
pub fn initialize_schema(conn: &rusqlite::Connection, table: &str) -> StorageResult<()> {
    validate_table_name(table)?;
    conn.execute_batch(RUNS_SCHEMA_SQL)?;
    conn.execute_batch(&fetch_table_sql(table))?;
    Ok(())
}
