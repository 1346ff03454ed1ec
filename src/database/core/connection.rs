//! Database connection management
//!
//! This module provides the SQLite connection wrapper used for every guild database.

use super::error::{StoreError, StoreResult};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Default busy timeout applied to every connection
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Core database connection wrapper
///
/// `DatabaseConn` wraps a SQLite connection and applies the durability and
/// consistency pragmas every guild database needs. Write-ahead logging and
/// foreign key enforcement are mandatory: if either cannot be enabled the
/// open fails.
#[derive(Debug)]
pub struct DatabaseConn {
    pub conn: Connection,
}

impl DatabaseConn {
    /// Open a database file at the specified path
    ///
    /// The parent directory must already exist.
    pub fn open(path: &Path, busy_timeout_ms: u64) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(|e| match e {
            rusqlite::Error::SqliteFailure(_, _) => StoreError::io(
                path,
                std::io::Error::other(format!("failed to open database: {}", e)),
            ),
            other => StoreError::Sqlite(other),
        })?;

        let db = DatabaseConn { conn };
        db.configure(busy_timeout_ms, true)?;
        Ok(db)
    }

    /// Create an in-memory database
    ///
    /// In-memory databases cannot use write-ahead logging, so only the
    /// remaining pragmas are applied.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = DatabaseConn { conn };
        db.configure(DEFAULT_BUSY_TIMEOUT_MS, false)?;
        Ok(db)
    }

    fn configure(&self, busy_timeout_ms: u64, wal: bool) -> StoreResult<()> {
        self.conn
            .busy_timeout(Duration::from_millis(busy_timeout_ms))?;

        if wal {
            let mode: String = self
                .conn
                .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
            if !mode.eq_ignore_ascii_case("wal") {
                return Err(StoreError::Pragma(format!(
                    "write-ahead logging (journal_mode={})",
                    mode
                )));
            }
        }

        // NORMAL is durable under WAL
        self.conn.execute_batch("PRAGMA synchronous=NORMAL")?;

        self.conn.execute_batch("PRAGMA foreign_keys=ON")?;
        let fk: i64 = self
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        if fk != 1 {
            return Err(StoreError::Pragma("foreign key enforcement".to_string()));
        }

        Ok(())
    }

    /// Current journal mode, lowercased
    pub fn journal_mode(&self) -> StoreResult<String> {
        let mode: String = self
            .conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        Ok(mode.to_lowercase())
    }

    /// Whether foreign key enforcement is on
    pub fn foreign_keys_enabled(&self) -> StoreResult<bool> {
        let fk: i64 = self
            .conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        Ok(fk == 1)
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> StoreResult<bool> {
        table_exists(&self.conn, table_name)
    }

    /// Get the row count for a table
    pub fn table_count(&self, table_name: &str) -> StoreResult<u64> {
        let query = format!("SELECT COUNT(*) FROM \"{}\"", table_name.replace('"', "\"\""));
        let count: u64 = self.conn.query_row(&query, [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Check if a table exists on a borrowed connection
pub fn table_exists(conn: &Connection, table_name: &str) -> StoreResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [table_name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_in_memory() {
        let db = DatabaseConn::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_open_file_sets_pragmas() {
        let dir = tempdir().unwrap();
        let db = DatabaseConn::open(&dir.path().join("guild-1.db"), 1000).unwrap();

        assert_eq!(db.journal_mode().unwrap(), "wal");
        assert!(db.foreign_keys_enabled().unwrap());
    }

    #[test]
    fn test_open_missing_directory_is_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope").join("guild-1.db");
        let err = DatabaseConn::open(&path, 1000).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[test]
    fn test_table_exists() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.conn
            .execute_batch("CREATE TABLE test_table (id INTEGER PRIMARY KEY)")
            .unwrap();

        assert!(db.table_exists("test_table").unwrap());
        assert!(!db.table_exists("nonexistent_table").unwrap());
    }

    #[test]
    fn test_table_count() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.conn
            .execute_batch(
                "CREATE TABLE test_table (id INTEGER PRIMARY KEY);
                 INSERT INTO test_table (id) VALUES (1), (2), (3);",
            )
            .unwrap();

        assert_eq!(db.table_count("test_table").unwrap(), 3);
    }
}
