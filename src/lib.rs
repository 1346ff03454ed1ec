#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! guild-store - per-guild storage for a tabletop-RPG Discord bot
//!
//! Each Discord guild gets its own SQLite database. This crate opens and
//! caches those databases, evolves their schema through ordered SQL
//! migration files, and gives older single-database code a default guild to
//! talk to.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | (none) | Storage, migrations, configuration | `rusqlite`, `config` |
//! | `display` | Table formatting for status output | `tabled` |
//! | `cli` | `guild-store` operator binary | All above + `clap`, `tracing-subscriber` |
//!
//! ```toml
//! # Library only
//! guild-store = { version = "0.3", default-features = false }
//! ```
//!
//! # Architecture
//!
//! - **[`database`]**: all storage functionality
//!   - `core`: connection wrapper, migration source, migration engine, errors
//!   - `guild`: connection registry, default-guild access, repositories
//! - **[`config`]**: configuration loading and the `ConfigProvider` seam
//! - **[`output`]**: output formats shared by the operator commands
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use guild_store::{GuildStore, GuildStoreConfig};
//!
//! let store = GuildStore::new(GuildStoreConfig::new(&None)?);
//!
//! let status = store.migration_status("123456789012345678")?;
//! if !status.is_up_to_date() {
//!     let report = store.migrate("123456789012345678")?;
//!     if let Some(failure) = report.failure {
//!         eprintln!("{} failed: {}", failure.name, failure.error);
//!     }
//! }
//!
//! store.shutdown();
//! ```

pub mod config;
pub mod database;
pub mod output;

// =============================================================================
// Configuration
// =============================================================================

pub use crate::config::{ConfigProvider, GuildStoreConfig, PendingCheckPolicy, DEFAULT_GUILD_SENTINEL};

// =============================================================================
// Database Module - Re-export commonly used types
// =============================================================================

pub use database::{
    ApplyReport, ConnectionRegistry, DefaultGuildDatabase, GuildDatabase, GuildHandle, GuildStore,
    MigrationEngine, MigrationSource, MigrationStatus, StoreError, StoreResult,
};

pub use output::OutputFormat;
