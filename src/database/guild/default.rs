//! Guild database access for code that does not know its guild
//!
//! Older call sites were written against a single database. They use a
//! [`GuildDatabase`] trait object, which is either a real guild handle or a
//! [`DefaultGuildDatabase`] that resolves the configured default guild on
//! first use and delegates to its handle from then on.

use super::registry::{ConnectionRegistry, GuildHandle};
use crate::config::DEFAULT_GUILD_SENTINEL;
use crate::database::core::{table_exists, StoreResult};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Access to one guild's database, whichever way that guild was chosen
pub trait GuildDatabase: Send + Sync {
    /// Guild this database belongs to
    fn resolve_guild_id(&self) -> StoreResult<String>;

    /// The live handle for the guild
    fn handle(&self) -> StoreResult<GuildHandle>;

    /// Execute one or more SQL statements
    fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        self.handle()?.with_connection(|conn| {
            conn.execute_batch(sql)?;
            Ok(())
        })
    }

    /// Check if a table exists
    fn table_exists(&self, table_name: &str) -> StoreResult<bool> {
        self.handle()?
            .with_connection(|conn| table_exists(conn, table_name))
    }
}

impl GuildDatabase for GuildHandle {
    fn resolve_guild_id(&self) -> StoreResult<String> {
        Ok(self.as_ref().guild_id().to_string())
    }

    fn handle(&self) -> StoreResult<GuildHandle> {
        Ok(Arc::clone(self))
    }
}

/// The implicit default guild
///
/// The guild id comes from the registry's configuration provider, falling
/// back to `"default"`, and is resolved once per instance. The handle itself
/// is fetched from the registry on every call, so it stays valid across a
/// registry `close`.
pub struct DefaultGuildDatabase {
    registry: Arc<ConnectionRegistry>,
    resolved: OnceLock<String>,
}

impl DefaultGuildDatabase {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            resolved: OnceLock::new(),
        }
    }

    fn resolve(&self) -> &str {
        self.resolved.get_or_init(|| {
            let guild_id = self
                .registry
                .provider()
                .default_guild_id()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GUILD_SENTINEL.to_string());
            debug!("default guild resolved to {}", guild_id);
            guild_id
        })
    }

    /// Whether the default guild has been resolved yet
    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }
}

impl GuildDatabase for DefaultGuildDatabase {
    fn resolve_guild_id(&self) -> StoreResult<String> {
        Ok(self.resolve().to_string())
    }

    fn handle(&self) -> StoreResult<GuildHandle> {
        self.registry.get_connection(self.resolve())
    }
}

impl GuildDatabase for Arc<DefaultGuildDatabase> {
    fn resolve_guild_id(&self) -> StoreResult<String> {
        self.as_ref().resolve_guild_id()
    }

    fn handle(&self) -> StoreResult<GuildHandle> {
        self.as_ref().handle()
    }
}

// Formatting must not resolve the guild or open anything.
impl fmt::Debug for DefaultGuildDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultGuildDatabase")
            .field("guild_id", &self.resolved.get())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for DefaultGuildDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resolved.get() {
            Some(guild_id) => write!(f, "default guild database ({})", guild_id),
            None => write!(f, "default guild database (unresolved)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigProvider, PendingCheckPolicy};
    use crate::database::core::MigrationSource;
    use crate::database::guild::registry::RegistrySettings;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    struct CountingProvider {
        default_guild: Option<String>,
        lookups: AtomicUsize,
    }

    impl ConfigProvider for CountingProvider {
        fn resolve_override_path(&self, _guild_id: &str) -> Option<String> {
            None
        }

        fn default_guild_id(&self) -> Option<String> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.default_guild.clone()
        }
    }

    fn registry(dir: &TempDir, provider: Arc<CountingProvider>) -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new(
            RegistrySettings {
                data_dir: dir.path().to_path_buf(),
                db_prefix: "guild".to_string(),
                busy_timeout_ms: 1000,
                pending_check: PendingCheckPolicy::Never,
            },
            provider,
            MigrationSource::new(dir.path().join("migrations")),
        ))
    }

    fn provider(default_guild: Option<&str>) -> Arc<CountingProvider> {
        Arc::new(CountingProvider {
            default_guild: default_guild.map(str::to_string),
            lookups: AtomicUsize::new(0),
        })
    }

    #[test]
    fn test_configured_default_guild() {
        let dir = tempdir().unwrap();
        let provider = provider(Some("9001"));
        let registry = registry(&dir, provider.clone());
        let db = DefaultGuildDatabase::new(registry.clone());

        assert_eq!(db.resolve_guild_id().unwrap(), "9001");
        let handle = db.handle().unwrap();
        assert!(Arc::ptr_eq(&handle, &registry.get_connection("9001").unwrap()));
    }

    #[test]
    fn test_sentinel_when_unconfigured() {
        let dir = tempdir().unwrap();
        let db = DefaultGuildDatabase::new(registry(&dir, provider(None)));
        assert_eq!(db.resolve_guild_id().unwrap(), DEFAULT_GUILD_SENTINEL);
        db.handle().unwrap();
        assert!(dir.path().join("guild-default.db").exists());
    }

    #[test]
    fn test_resolution_is_memoized() {
        let dir = tempdir().unwrap();
        let provider = provider(Some("1"));
        let db = DefaultGuildDatabase::new(registry(&dir, provider.clone()));

        db.resolve_guild_id().unwrap();
        db.handle().unwrap();
        db.table_exists("anything").unwrap();
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_formatting_does_not_resolve() {
        let dir = tempdir().unwrap();
        let provider = provider(Some("1"));
        let registry = registry(&dir, provider.clone());
        let db = DefaultGuildDatabase::new(registry.clone());

        let _ = format!("{:?} {}", db, db);
        assert!(!db.is_resolved());
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 0);
        assert!(registry.open_guilds().is_empty());

        db.resolve_guild_id().unwrap();
        assert_eq!(db.to_string(), "default guild database (1)");
    }

    #[test]
    fn test_delegation_matches_direct_handle() {
        let dir = tempdir().unwrap();
        let registry = registry(&dir, provider(Some("77")));
        let legacy: Box<dyn GuildDatabase> = Box::new(DefaultGuildDatabase::new(registry.clone()));
        let direct: Box<dyn GuildDatabase> = Box::new(registry.get_connection("77").unwrap());

        legacy
            .execute_batch("CREATE TABLE scenes (id INTEGER PRIMARY KEY)")
            .unwrap();
        assert!(direct.table_exists("scenes").unwrap());
        assert_eq!(legacy.resolve_guild_id().unwrap(), direct.resolve_guild_id().unwrap());
    }

    #[test]
    fn test_survives_registry_close() {
        let dir = tempdir().unwrap();
        let registry = registry(&dir, provider(Some("5")));
        let db = DefaultGuildDatabase::new(registry.clone());

        db.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        registry.close_all();
        assert!(db.table_exists("t").unwrap());
    }
}
