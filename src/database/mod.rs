//! Database module
//!
//! This module provides all storage functionality for the bot, organized into:
//!
//! - **core**: SQLite connection wrapper, migration source and migration engine
//! - **guild**: per-guild connection registry, default-guild access and repositories
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/             # Foundation
//! │   ├── connection    # SQLite DatabaseConn wrapper (WAL, foreign keys)
//! │   ├── source        # NNN_description.sql migration files
//! │   ├── schema        # bookkeeping table and MigrationEngine
//! │   └── error         # StoreError
//! │
//! └── guild/            # One database per Discord guild
//!     ├── registry      # ConnectionRegistry: guild id -> cached handle
//!     ├── default       # GuildDatabase trait, DefaultGuildDatabase
//!     ├── characters    # character sheets
//!     ├── fellowships   # groups of characters
//!     └── webhooks      # push-notification subscriptions
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use guild_store::{GuildStore, GuildStoreConfig};
//! use guild_store::database::CharacterRepository;
//!
//! let store = GuildStore::new(GuildStoreConfig::new(&None)?);
//!
//! // Opening a guild warns about pending migrations but never applies them
//! let guild = store.connection("123456789012345678")?;
//!
//! // Operators apply them explicitly
//! let report = store.migrate("123456789012345678")?;
//! println!("applied {} migration(s)", report.count);
//!
//! let characters = guild.with_connection(|conn| {
//!     CharacterRepository::new(conn).list_by_user("987654321")
//! })?;
//! ```

pub mod core;
pub mod guild;

// Connection wrapper, migration engine and errors
pub use core::{
    table_exists, AppliedMigration, ApplyReport, DatabaseConn, MigrationEngine,
    MigrationFailure, MigrationSet, MigrationSource, MigrationStatus, MigrationUnit,
    SchemaDefinitions, StoreError, StoreResult, BOOKKEEPING_TABLE, DEFAULT_BUSY_TIMEOUT_MS,
    MIGRATION_EXTENSION,
};

// Per-guild registry and default-guild access
pub use guild::{
    validate_guild_id, ConnectionRegistry, DefaultGuildDatabase, GuildConnection, GuildDatabase,
    GuildHandle, GuildStore, RegistrySettings, DATABASE_EXTENSION, GUILD_ID_TOKEN,
};

// Repositories
pub use guild::{
    CharacterRecord, CharacterRepository, FellowshipMember, FellowshipRecord,
    FellowshipRepository, WebhookSubscription, WebhookSubscriptionRepository,
};
