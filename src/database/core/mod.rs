//! Core database infrastructure
//!
//! This module provides the foundational database components used for every guild:
//! - `DatabaseConn`: SQLite connection wrapper with mandatory pragmas
//! - `MigrationSource`: directory of ordered SQL migration units
//! - `MigrationEngine`: bookkeeping, pending computation and transactional apply
//! - `StoreError`: error taxonomy shared by the storage layer

mod connection;
mod error;
mod schema;
mod source;

pub use connection::{table_exists, DatabaseConn, DEFAULT_BUSY_TIMEOUT_MS};
pub use error::{StoreError, StoreResult};
pub use schema::{
    AppliedMigration, ApplyReport, MigrationEngine, MigrationFailure, MigrationSet,
    MigrationStatus, SchemaDefinitions, BOOKKEEPING_TABLE,
};
pub use source::{MigrationSource, MigrationUnit, MIGRATION_EXTENSION};
