//! Schema migration engine
//!
//! [`MigrationEngine`] tracks which migration units have been applied to one
//! guild database, computes the pending set, and applies units inside
//! transactions. It borrows the connection and keeps no state between
//! calls, so a fresh engine can be built for every operation.

use super::connection::table_exists;
use super::error::{is_unique_violation, StoreError, StoreResult};
use super::source::MigrationSource;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Name of the bookkeeping table inside each guild database
pub const BOOKKEEPING_TABLE: &str = "schema_migrations";

/// Schema definitions owned by the migration engine
pub struct SchemaDefinitions;

impl SchemaDefinitions {
    /// SQL for creating the bookkeeping table
    pub const BOOKKEEPING: &'static str = r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );
    "#;
}

/// A migration recorded in the bookkeeping table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub name: String,
    /// Seconds since the Unix epoch
    pub applied_at: i64,
}

impl AppliedMigration {
    /// `applied_at` as a UTC timestamp, if it is in range
    pub fn applied_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.applied_at, 0)
    }
}

/// Count and names of one side of the migration status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationSet {
    pub count: usize,
    pub names: Vec<String>,
}

impl From<Vec<String>> for MigrationSet {
    fn from(names: Vec<String>) -> Self {
        Self {
            count: names.len(),
            names,
        }
    }
}

/// Applied and pending migrations of one guild database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub applied: MigrationSet,
    pub pending: MigrationSet,
}

impl MigrationStatus {
    pub fn is_up_to_date(&self) -> bool {
        self.pending.count == 0
    }
}

/// The unit that stopped a migration run, and why
#[derive(Debug)]
pub struct MigrationFailure {
    pub name: String,
    pub error: StoreError,
}

/// Outcome of [`MigrationEngine::apply_pending`]
///
/// `count` and `applied_names` cover the units committed before the run
/// stopped. When `failure` is set, every unit after the failed one was left
/// untouched.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub count: usize,
    pub applied_names: Vec<String>,
    pub failure: Option<MigrationFailure>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Convert into a `Result`, discarding partial progress on failure
    pub fn into_result(self) -> StoreResult<Vec<String>> {
        match self.failure {
            None => Ok(self.applied_names),
            Some(failure) => Err(failure.error),
        }
    }
}

/// Migration engine for a single guild database
pub struct MigrationEngine<'a> {
    conn: &'a Connection,
    source: &'a MigrationSource,
}

impl<'a> MigrationEngine<'a> {
    /// Create a new engine for the given connection and source
    pub fn new(conn: &'a Connection, source: &'a MigrationSource) -> Self {
        Self { conn, source }
    }

    /// Create the bookkeeping table if it does not exist
    pub fn ensure_bookkeeping(&self) -> StoreResult<()> {
        self.conn.execute_batch(SchemaDefinitions::BOOKKEEPING)?;
        Ok(())
    }

    fn bookkeeping_exists(&self) -> StoreResult<bool> {
        table_exists(self.conn, BOOKKEEPING_TABLE)
    }

    /// Names of applied migrations, sorted ascending
    ///
    /// A database without a bookkeeping table has nothing applied; reading
    /// it does not create the table.
    pub fn list_applied(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .applied_records()?
            .into_iter()
            .map(|record| record.name)
            .collect())
    }

    /// Applied migrations with their timestamps, sorted by name
    pub fn applied_records(&self) -> StoreResult<Vec<AppliedMigration>> {
        if !self.bookkeeping_exists()? {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare("SELECT name, applied_at FROM schema_migrations ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(AppliedMigration {
                name: row.get(0)?,
                applied_at: row.get(1)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Names discovered in the source but not yet applied, sorted ascending
    ///
    /// Fails with [`StoreError::MissingSource`] if an applied migration is
    /// no longer present in the source.
    pub fn list_pending(&self) -> StoreResult<Vec<String>> {
        let discovered = self.source.names()?;
        let applied = self.list_applied()?;

        let known: HashSet<&str> = discovered.iter().map(String::as_str).collect();
        if let Some(missing) = applied.iter().find(|name| !known.contains(name.as_str())) {
            return Err(StoreError::MissingSource(missing.clone()));
        }

        let applied: HashSet<&str> = applied.iter().map(String::as_str).collect();
        Ok(discovered
            .iter()
            .filter(|name| !applied.contains(name.as_str()))
            .cloned()
            .collect())
    }

    /// Apply one migration unit atomically
    ///
    /// The bookkeeping record is inserted first, then the body runs, in one
    /// transaction. Either both commit or the database is left as it was.
    pub fn apply_one(&self, name: &str) -> StoreResult<()> {
        let unit = self.source.load(name)?;
        self.ensure_bookkeeping()?;

        let tx = self.conn.unchecked_transaction()?;

        if let Err(e) = tx.execute(
            "INSERT INTO schema_migrations (name) VALUES (?1)",
            params![unit.name],
        ) {
            return Err(if is_unique_violation(&e) {
                StoreError::AlreadyApplied(unit.name)
            } else {
                StoreError::Sqlite(e)
            });
        }

        if let Err(e) = tx.execute_batch(&unit.body) {
            // dropping the transaction rolls it back
            return Err(StoreError::ApplyFailure {
                name: unit.name,
                source: e,
            });
        }

        tx.commit()?;
        info!("applied migration {}", unit.name);
        Ok(())
    }

    /// Apply every pending migration in ascending order, stopping at the
    /// first failure
    pub fn apply_pending(&self) -> StoreResult<ApplyReport> {
        let pending = self.list_pending()?;
        let mut report = ApplyReport::default();

        if pending.is_empty() {
            debug!("no pending migrations");
            return Ok(report);
        }

        for name in pending {
            match self.apply_one(&name) {
                Ok(()) => {
                    report.count += 1;
                    report.applied_names.push(name);
                }
                Err(error) => {
                    warn!(
                        "migration {} failed after {} applied: {}",
                        name, report.count, error
                    );
                    report.failure = Some(MigrationFailure { name, error });
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Applied and pending migrations; never mutates the database
    pub fn status(&self) -> StoreResult<MigrationStatus> {
        let applied = self.list_applied()?;
        let pending = self.list_pending()?;
        Ok(MigrationStatus {
            applied: applied.into(),
            pending: pending.into(),
        })
    }

    pub fn is_up_to_date(&self) -> StoreResult<bool> {
        Ok(self.list_pending()?.is_empty())
    }
}
