//! Per-guild connection registry
//!
//! [`ConnectionRegistry`] maps a guild id to exactly one open
//! [`GuildConnection`]. The first request for a guild resolves its file path,
//! opens the database with the mandatory pragmas and runs a read-only
//! migration check; later requests return the cached handle untouched.

use crate::config::{ConfigProvider, GuildStoreConfig, PendingCheckPolicy};
use crate::database::core::{
    AppliedMigration, ApplyReport, DatabaseConn, MigrationEngine, MigrationSource, MigrationStatus, StoreError,
    StoreResult,
};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Token replaced by the guild id in a path override
pub const GUILD_ID_TOKEN: &str = "{guild_id}";

/// Extension of guild database files
pub const DATABASE_EXTENSION: &str = "db";

/// Override extensions treated as a per-guild filename template
const TEMPLATE_EXTENSIONS: &[&str] = &["db", "sqlite", "sqlite3"];

/// Shared handle to one guild's database
pub type GuildHandle = Arc<GuildConnection>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Validate a guild id and return it
///
/// Guild ids are opaque, but they end up in file names, so path separators
/// and dot segments are rejected along with empty ids.
pub fn validate_guild_id(guild_id: &str) -> StoreResult<&str> {
    if guild_id.trim().is_empty() {
        return Err(StoreError::InvalidArgument(
            "guild id must not be empty".to_string(),
        ));
    }
    if guild_id.contains(['/', '\\', '\0']) || guild_id == "." || guild_id == ".." {
        return Err(StoreError::InvalidArgument(format!(
            "guild id '{}' is not usable in a file name",
            guild_id.escape_debug()
        )));
    }
    Ok(guild_id)
}

/// One guild's open database
///
/// The connection is guarded by a mutex, so statements and migration
/// transactions on one guild never interleave. Once the registry closes the
/// handle, every clone of it reports [`StoreError::Closed`].
pub struct GuildConnection {
    guild_id: String,
    path: PathBuf,
    db: Mutex<Option<DatabaseConn>>,
}

impl GuildConnection {
    fn new(guild_id: &str, path: PathBuf, db: DatabaseConn) -> Self {
        Self {
            guild_id: guild_id.to_string(),
            path,
            db: Mutex::new(Some(db)),
        }
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    /// Backing database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.db).is_none()
    }

    /// Run `f` against the underlying connection
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let guard = lock(&self.db);
        match guard.as_ref() {
            Some(db) => f(&db.conn),
            None => Err(StoreError::Closed(self.guild_id.clone())),
        }
    }

    /// Applied and pending migrations for this guild
    pub fn migration_status(&self, source: &MigrationSource) -> StoreResult<MigrationStatus> {
        self.with_connection(|conn| MigrationEngine::new(conn, source).status())
    }

    /// Applied migrations with their timestamps
    pub fn applied_records(&self, source: &MigrationSource) -> StoreResult<Vec<AppliedMigration>> {
        self.with_connection(|conn| MigrationEngine::new(conn, source).applied_records())
    }

    /// Apply every pending migration, stopping at the first failure
    pub fn apply_pending(&self, source: &MigrationSource) -> StoreResult<ApplyReport> {
        self.with_connection(|conn| MigrationEngine::new(conn, source).apply_pending())
    }

    /// Apply a single named migration
    pub fn apply_one(&self, source: &MigrationSource, name: &str) -> StoreResult<()> {
        self.with_connection(|conn| MigrationEngine::new(conn, source).apply_one(name))
    }

    fn close(&self) {
        let Some(db) = lock(&self.db).take() else {
            return;
        };
        if let Err((_, e)) = db.conn.close() {
            warn!("error closing database for guild {}: {}", self.guild_id, e);
        } else {
            debug!("closed database for guild {}", self.guild_id);
        }
    }
}

impl fmt::Debug for GuildConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuildConnection")
            .field("guild_id", &self.guild_id)
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Registry settings that do not vary per guild
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub data_dir: PathBuf,
    pub db_prefix: String,
    pub busy_timeout_ms: u64,
    pub pending_check: PendingCheckPolicy,
}

impl From<&GuildStoreConfig> for RegistrySettings {
    fn from(config: &GuildStoreConfig) -> Self {
        Self {
            data_dir: config.data_dir_path(),
            db_prefix: config.db_prefix.clone(),
            busy_timeout_ms: config.busy_timeout_ms,
            pending_check: config.pending_check,
        }
    }
}

/// Owner of every open guild database in the process
pub struct ConnectionRegistry {
    settings: RegistrySettings,
    provider: Arc<dyn ConfigProvider>,
    source: MigrationSource,
    handles: Mutex<HashMap<String, GuildHandle>>,
    checked: Mutex<HashSet<String>>,
}

impl ConnectionRegistry {
    /// Create a registry with an explicit configuration provider
    pub fn new(
        settings: RegistrySettings,
        provider: Arc<dyn ConfigProvider>,
        source: MigrationSource,
    ) -> Self {
        Self {
            settings,
            provider,
            source,
            handles: Mutex::new(HashMap::new()),
            checked: Mutex::new(HashSet::new()),
        }
    }

    /// Create a registry whose provider is the configuration itself
    pub fn from_config(config: &GuildStoreConfig) -> Self {
        Self::new(
            RegistrySettings::from(config),
            Arc::new(config.clone()),
            MigrationSource::new(config.migrations_dir_path()),
        )
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub fn provider(&self) -> &Arc<dyn ConfigProvider> {
        &self.provider
    }

    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    fn default_file_name(&self, guild_id: &str) -> String {
        format!(
            "{}-{}.{}",
            self.settings.db_prefix, guild_id, DATABASE_EXTENSION
        )
    }

    /// Resolve the database file for a guild
    ///
    /// - an override containing `{guild_id}` has the token replaced
    /// - an override ending in `.db`, `.sqlite` or `.sqlite3` gets `-<guild_id>`
    ///   inserted before the extension, so guilds never share one file
    /// - any other override is a directory holding `<prefix>-<guild_id>.db`
    /// - without an override the file is `<data_dir>/<prefix>-<guild_id>.db`
    pub fn resolve_path(&self, guild_id: &str) -> StoreResult<PathBuf> {
        let guild_id = validate_guild_id(guild_id)?;

        let Some(template) = self.provider.resolve_override_path(guild_id) else {
            return Ok(self.settings.data_dir.join(self.default_file_name(guild_id)));
        };

        if template.contains(GUILD_ID_TOKEN) {
            return Ok(PathBuf::from(template.replace(GUILD_ID_TOKEN, guild_id)));
        }

        let path = Path::new(&template);
        let extension = path.extension().and_then(|e| e.to_str());
        let stem = path.file_stem().and_then(|s| s.to_str());
        match (stem, extension) {
            (Some(stem), Some(ext)) if TEMPLATE_EXTENSIONS.contains(&ext.to_lowercase().as_str()) => {
                Ok(path.with_file_name(format!("{}-{}.{}", stem, guild_id, ext)))
            }
            _ => Ok(path.join(self.default_file_name(guild_id))),
        }
    }

    /// Get the handle for a guild, opening it on first use
    pub fn get_connection(&self, guild_id: &str) -> StoreResult<GuildHandle> {
        let guild_id = validate_guild_id(guild_id)?;

        // held across the open so two callers cannot open the same guild twice
        let mut handles = lock(&self.handles);
        if let Some(handle) = handles.get(guild_id) {
            return Ok(Arc::clone(handle));
        }

        let path = self.resolve_path(guild_id)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let db = DatabaseConn::open(&path, self.settings.busy_timeout_ms)?;
        let handle = Arc::new(GuildConnection::new(guild_id, path, db));
        info!(
            "opened database for guild {} at {}",
            guild_id,
            handle.path().display()
        );

        self.check_pending(&handle);
        handles.insert(guild_id.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Warn about pending migrations without applying them
    fn check_pending(&self, handle: &GuildConnection) {
        match self.settings.pending_check {
            PendingCheckPolicy::Never => return,
            PendingCheckPolicy::Once => {
                if !lock(&self.checked).insert(handle.guild_id().to_string()) {
                    return;
                }
            }
            PendingCheckPolicy::EveryOpen => {}
        }

        match handle.migration_status(&self.source) {
            Ok(status) if !status.is_up_to_date() => warn!(
                "guild {} has {} pending migration(s): {}",
                handle.guild_id(),
                status.pending.count,
                status.pending.names.join(", ")
            ),
            Ok(_) => debug!("guild {} schema is up to date", handle.guild_id()),
            Err(e) => warn!(
                "could not check migrations for guild {}: {}",
                handle.guild_id(),
                e
            ),
        }
    }

    /// Close a guild's handle; returns whether one was open
    ///
    /// The next [`get_connection`](Self::get_connection) for the guild opens
    /// and checks it again.
    pub fn close(&self, guild_id: &str) -> bool {
        let removed = lock(&self.handles).remove(guild_id);
        match removed {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    /// Close every handle; returns how many were open
    pub fn close_all(&self) -> usize {
        let drained: Vec<GuildHandle> = lock(&self.handles).drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.close();
        }
        if !drained.is_empty() {
            info!("closed {} guild database(s)", drained.len());
        }
        drained.len()
    }

    pub fn is_open(&self, guild_id: &str) -> bool {
        lock(&self.handles).contains_key(guild_id)
    }

    /// Guild ids with an open handle, sorted
    pub fn open_guilds(&self) -> Vec<String> {
        let mut guilds: Vec<String> = lock(&self.handles).keys().cloned().collect();
        guilds.sort();
        guilds
    }

    /// Guild ids with a database file in the data directory, sorted
    ///
    /// Only files following the default naming are found; guilds stored
    /// under a path override are not.
    pub fn discover_guilds(&self) -> StoreResult<Vec<String>> {
        let dir = &self.settings.data_dir;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let prefix = format!("{}-", self.settings.db_prefix);
        let suffix = format!(".{}", DATABASE_EXTENSION);
        let mut guilds = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(dir, e))?;
            if !entry.path().is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let guild_id = name
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_suffix(suffix.as_str()));
            if let Some(guild_id) = guild_id.filter(|id| validate_guild_id(id).is_ok()) {
                guilds.push(guild_id.to_string());
            }
        }
        guilds.sort();
        Ok(guilds)
    }

    /// Whether a guild has a database, open or on disk
    ///
    /// Never creates anything.
    pub fn exists(&self, guild_id: &str) -> StoreResult<bool> {
        if self.is_open(guild_id) {
            return Ok(true);
        }
        Ok(self.resolve_path(guild_id)?.is_file())
    }

    /// Apply pending migrations to one guild
    pub fn migrate(&self, guild_id: &str) -> StoreResult<ApplyReport> {
        self.get_connection(guild_id)?.apply_pending(&self.source)
    }

    /// Migration status of one guild
    pub fn status(&self, guild_id: &str) -> StoreResult<MigrationStatus> {
        self.get_connection(guild_id)?.migration_status(&self.source)
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("settings", &self.settings)
            .field("source", &self.source)
            .field("open", &self.open_guilds())
            .finish()
    }
}
