//! Storage error taxonomy
//!
//! Every fallible operation of the connection registry and the migration
//! engine returns [`StoreError`]. Callers match on the variant to tell an
//! operator mistake (unknown migration, empty guild id) apart from a failed
//! schema change.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the guild storage core
#[derive(Debug, Error)]
pub enum StoreError {
    /// Missing or empty guild identifier, or another malformed argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The named migration unit does not exist in the migration source
    #[error("migration not found: {0}")]
    NotFound(String),

    /// The bookkeeping table already records this migration
    #[error("migration already applied: {0}")]
    AlreadyApplied(String),

    /// The migration body failed to execute; its transaction was rolled back
    #[error("migration {name} failed: {source}")]
    ApplyFailure {
        name: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A migration recorded as applied is no longer present in the source
    #[error("applied migration {0} is missing from the migration source")]
    MissingSource(String),

    /// A scaffold file would overwrite an existing migration
    #[error("migration file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// The handle was closed through the registry
    #[error("connection for guild {0} is closed")]
    Closed(String),

    /// A mandatory pragma could not be enabled on open
    #[error("database refused {0}")]
    Pragma(String),

    /// Filesystem failure (directory creation, file open, directory scan)
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other SQLite failure (pragmas, bookkeeping queries)
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error aborted a migration run (as opposed to failing
    /// before any unit was attempted)
    pub fn is_apply_error(&self) -> bool {
        matches!(
            self,
            StoreError::ApplyFailure { .. } | StoreError::AlreadyApplied(_)
        )
    }
}

/// Result alias used throughout the storage core
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Whether a rusqlite error is a `UNIQUE` constraint violation
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}
