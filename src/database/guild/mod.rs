//! Per-guild storage
//!
//! Every Discord guild gets its own SQLite file. This module provides:
//! - `ConnectionRegistry`: one cached handle per guild, opened on demand
//! - `GuildDatabase` / `DefaultGuildDatabase`: access for code without a guild id
//! - repositories for characters, fellowships and webhook subscriptions
//! - `GuildStore`: the process-level bundle of configuration and registry

mod characters;
mod default;
mod fellowships;
mod registry;
mod webhooks;

pub use characters::{CharacterRecord, CharacterRepository};
pub use default::{DefaultGuildDatabase, GuildDatabase};
pub use fellowships::{FellowshipMember, FellowshipRecord, FellowshipRepository};
pub use registry::{
    validate_guild_id, ConnectionRegistry, GuildConnection, GuildHandle, RegistrySettings,
    DATABASE_EXTENSION, GUILD_ID_TOKEN,
};
pub use webhooks::{WebhookSubscription, WebhookSubscriptionRepository};

use crate::config::GuildStoreConfig;
use crate::database::core::{
    AppliedMigration, ApplyReport, MigrationSource, MigrationStatus, StoreResult,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Storage entry point for the bot process
///
/// `GuildStore` is constructed once at startup and passed to whatever needs
/// storage. Tests build their own, each with an isolated registry.
#[derive(Debug)]
pub struct GuildStore {
    config: GuildStoreConfig,
    registry: Arc<ConnectionRegistry>,
    default_database: Arc<DefaultGuildDatabase>,
}

impl GuildStore {
    pub fn new(config: GuildStoreConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::from_config(&config));
        let default_database = Arc::new(DefaultGuildDatabase::new(Arc::clone(&registry)));
        Self {
            config,
            registry,
            default_database,
        }
    }

    pub fn config(&self) -> &GuildStoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn migration_source(&self) -> &MigrationSource {
        self.registry.source()
    }

    /// Handle for a guild, opened on first use
    pub fn connection(&self, guild_id: &str) -> StoreResult<GuildHandle> {
        self.registry.get_connection(guild_id)
    }

    /// Database access for a call site that may or may not know its guild
    ///
    /// With a guild id this is that guild's handle; without one it is the
    /// lazily resolved default guild.
    pub fn database(&self, guild_id: Option<&str>) -> StoreResult<Box<dyn GuildDatabase>> {
        match guild_id {
            Some(guild_id) => Ok(Box::new(self.connection(guild_id)?)),
            None => Ok(Box::new(self.default_database())),
        }
    }

    /// The store's default guild database
    ///
    /// Every call returns the same instance, so the default guild id is
    /// resolved at most once for the life of the store.
    pub fn default_database(&self) -> Arc<DefaultGuildDatabase> {
        Arc::clone(&self.default_database)
    }

    /// Apply pending migrations to one guild
    pub fn migrate(&self, guild_id: &str) -> StoreResult<ApplyReport> {
        self.registry.migrate(guild_id)
    }

    pub fn migration_status(&self, guild_id: &str) -> StoreResult<MigrationStatus> {
        self.registry.status(guild_id)
    }

    /// Applied migrations of one guild with their timestamps
    pub fn applied_migrations(&self, guild_id: &str) -> StoreResult<Vec<AppliedMigration>> {
        self.registry
            .get_connection(guild_id)?
            .applied_records(self.migration_source())
    }

    /// Whether a guild already has a database; never creates one
    pub fn has_database(&self, guild_id: &str) -> StoreResult<bool> {
        self.registry.exists(guild_id)
    }

    /// Guilds with a database in the data directory
    pub fn known_guilds(&self) -> StoreResult<Vec<String>> {
        self.registry.discover_guilds()
    }

    /// Scaffold the next migration file
    pub fn create_migration(&self, description: &str) -> StoreResult<PathBuf> {
        self.migration_source().create(description)
    }

    /// Close every open guild database; returns how many were open
    pub fn shutdown(&self) -> usize {
        self.registry.close_all()
    }
}

/// In-memory database with the shipped migrations applied
#[cfg(test)]
pub(crate) fn migrated_in_memory() -> crate::database::core::DatabaseConn {
    use crate::database::core::{DatabaseConn, MigrationEngine};

    let db = DatabaseConn::open_in_memory().unwrap();
    let source = MigrationSource::new(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations"));
    let report = MigrationEngine::new(&db.conn, &source)
        .apply_pending()
        .unwrap();
    assert!(report.is_success(), "{:?}", report.failure);
    db
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::StoreError;
    use tempfile::tempdir;

    fn store(dir: &tempfile::TempDir) -> GuildStore {
        let mut config = GuildStoreConfig::with_data_dir(dir.path().join("data").to_string_lossy());
        config.migrations_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/migrations").to_string();
        config.default_guild_id = Some("100".to_string());
        GuildStore::new(config)
    }

    #[test]
    fn test_shipped_migrations_apply() {
        let dir = tempdir().unwrap();
        let store = store(&dir);

        let report = store.migrate("123").unwrap();
        assert!(report.is_success());
        assert_eq!(
            report.applied_names,
            vec![
                "001_create_characters.sql",
                "002_create_fellowships.sql",
                "003_create_webhook_subscriptions.sql",
            ]
        );

        let status = store.migration_status("123").unwrap();
        assert!(status.is_up_to_date());
        assert_eq!(status.applied.count, 3);

        // other guilds are untouched
        assert_eq!(store.migration_status("456").unwrap().pending.count, 3);
    }

    #[test]
    fn test_has_database_does_not_create() {
        let dir = tempdir().unwrap();
        let store = store(&dir);

        assert!(!store.has_database("777").unwrap());
        assert!(!store.registry().resolve_path("777").unwrap().exists());

        store.connection("777").unwrap();
        assert!(store.has_database("777").unwrap());
        store.shutdown();
        assert!(store.has_database("777").unwrap());
        assert!(store.has_database("").is_err());
    }

    #[test]
    fn test_applied_migrations() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        assert!(store.applied_migrations("123").unwrap().is_empty());

        store.migrate("123").unwrap();
        let applied = store.applied_migrations("123").unwrap();
        assert_eq!(applied.len(), 3);
        assert_eq!(applied[0].name, "001_create_characters.sql");
        assert!(applied.iter().all(|m| m.applied_time().is_some()));
    }

    #[test]
    fn test_database_factory() {
        let dir = tempdir().unwrap();
        let store = store(&dir);

        let explicit = store.database(Some("200")).unwrap();
        assert_eq!(explicit.resolve_guild_id().unwrap(), "200");

        let legacy = store.database(None).unwrap();
        assert_eq!(legacy.resolve_guild_id().unwrap(), "100");

        assert!(matches!(
            store.database(Some("")),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_default_database_is_shared() {
        let dir = tempdir().unwrap();
        let store = store(&dir);

        let first = store.default_database();
        assert!(!first.is_resolved());
        store.database(None).unwrap().resolve_guild_id().unwrap();

        assert!(first.is_resolved());
        assert!(Arc::ptr_eq(&first, &store.default_database()));
    }

    #[test]
    fn test_known_guilds_and_shutdown() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        store.connection("2").unwrap();
        store.connection("1").unwrap();

        assert_eq!(store.known_guilds().unwrap(), vec!["1", "2"]);
        assert_eq!(store.shutdown(), 2);
    }
}
