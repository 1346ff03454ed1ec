use anyhow::{anyhow, Result};
use config::Config;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::database::DEFAULT_BUSY_TIMEOUT_MS;

/// Key prefix for per-guild database path overrides, e.g. `database_path_1234`
const GUILD_PATH_KEY_PREFIX: &str = "database_path_";

/// Guild id used by the legacy default accessor when none is configured
pub const DEFAULT_GUILD_SENTINEL: &str = "default";

/// Supplies per-guild settings to the connection registry
pub trait ConfigProvider: Send + Sync {
    /// Database path override for a guild, if any
    ///
    /// The value may be a template: see
    /// [`ConnectionRegistry::resolve_path`](crate::database::ConnectionRegistry::resolve_path).
    fn resolve_override_path(&self, guild_id: &str) -> Option<String>;

    /// Guild id served by the legacy default accessor
    fn default_guild_id(&self) -> Option<String> {
        None
    }
}

/// When the registry checks for pending migrations on open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PendingCheckPolicy {
    /// Never check
    Never,
    /// Check the first time each guild is opened by a registry
    Once,
    /// Check every time a handle is opened (cache hits never check)
    #[default]
    EveryOpen,
}

impl fmt::Display for PendingCheckPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => write!(f, "never"),
            Self::Once => write!(f, "once"),
            Self::EveryOpen => write!(f, "every-open"),
        }
    }
}

impl FromStr for PendingCheckPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "never" | "off" => Ok(Self::Never),
            "once" => Ok(Self::Once),
            "every-open" | "every_open" | "always" => Ok(Self::EveryOpen),
            _ => Err(format!(
                "Unknown pending check policy '{}'. Valid values: never, once, every-open",
                s
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuildStoreConfig {
    /// Directory holding one database file per guild
    pub data_dir: String,

    /// Database path override applied to every guild (may be a template)
    pub database_path: Option<String>,

    /// Per-guild database path overrides, keyed by guild id
    pub guild_paths: HashMap<String, String>,

    /// Guild served by the legacy default accessor
    pub default_guild_id: Option<String>,

    /// Directory of SQL migration units
    pub migrations_dir: String,

    /// Filename prefix for guild databases: `<prefix>-<guild_id>.db`
    pub db_prefix: String,

    /// SQLite busy timeout in milliseconds
    pub busy_timeout_ms: u64,

    /// Pending-migration check performed when a handle is opened
    pub pending_check: PendingCheckPolicy,
}

const EMPTY_CONFIG: &str = r#"### guild-store configuration file

### directory holding one SQLite file per guild
# data_dir = "~/.guild-store"

### single database path override; use {guild_id} or a .db file name as a template
# database_path = "/srv/bot/guild-{guild_id}.db"

### per-guild override
# database_path_123456789012345678 = "/srv/bot/special.db"

### guild served to code that does not pass a guild id
# default_guild_id = "123456789012345678"

### directory of NNN_description.sql migration files
# migrations_dir = "migrations"

# db_prefix = "guild"
# busy_timeout_ms = 5000

### pending migration check on open: never, once, every-open
# pending_check = "every-open"
"#;

impl Default for GuildStoreConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self {
            data_dir: format!("{}/.guild-store", home_dir),
            database_path: None,
            guild_paths: HashMap::new(),
            default_guild_id: None,
            migrations_dir: "migrations".to_string(),
            db_prefix: "guild".to_string(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            pending_check: PendingCheckPolicy::default(),
        }
    }
}

impl GuildStoreConfig {
    /// Create a configuration rooted at the given data directory, with defaults
    /// for everything else
    pub fn with_data_dir(data_dir: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<GuildStoreConfig> {
        // A missing .env is fine; variables may come from the real environment
        let _ = dotenvy::dotenv();

        let mut builder = Config::builder();

        // By default use $HOME/.guild-store/guild-store.toml as the configuration file path
        let home_dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
            .to_owned();

        let store_dir = format!("{}/.guild-store", home_dir.as_str());

        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(store_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create guild-store directory: {}", e))?;
                let p = format!("{}/guild-store.toml", store_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // Add in settings from the environment (with a prefix of GUILD_STORE)
        // E.g., `GUILD_STORE_DEFAULT_GUILD_ID=1234 ./guild-store` sets the default guild
        builder = builder.add_source(config::Environment::with_prefix("GUILD_STORE"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        Self::from_map(&config, store_dir)
    }

    fn from_map(config: &HashMap<String, String>, default_data_dir: String) -> Result<Self> {
        let non_empty = |key: &str| {
            config
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let data_dir = non_empty("data_dir")
            .map(|p| expand_home(&p))
            .unwrap_or(default_data_dir);

        let guild_paths = config
            .iter()
            .filter_map(|(key, value)| {
                let guild_id = key.strip_prefix(GUILD_PATH_KEY_PREFIX)?;
                let value = value.trim();
                if guild_id.is_empty() || value.is_empty() {
                    return None;
                }
                Some((guild_id.to_string(), expand_home(value)))
            })
            .collect();

        let busy_timeout_ms = match non_empty("busy_timeout_ms") {
            Some(v) => v
                .parse()
                .map_err(|e| anyhow!("Invalid busy_timeout_ms '{}': {}", v, e))?,
            None => DEFAULT_BUSY_TIMEOUT_MS,
        };

        let pending_check = match non_empty("pending_check") {
            Some(v) => v.parse().map_err(|e: String| anyhow!(e))?,
            None => PendingCheckPolicy::default(),
        };

        Ok(GuildStoreConfig {
            data_dir,
            database_path: non_empty("database_path").map(|p| expand_home(&p)),
            guild_paths,
            default_guild_id: non_empty("default_guild_id"),
            migrations_dir: non_empty("migrations_dir")
                .map(|p| expand_home(&p))
                .unwrap_or_else(|| "migrations".to_string()),
            db_prefix: non_empty("db_prefix").unwrap_or_else(|| "guild".to_string()),
            busy_timeout_ms,
            pending_check,
        })
    }

    /// Data directory as a path
    pub fn data_dir_path(&self) -> PathBuf {
        PathBuf::from(self.data_dir.trim_end_matches('/'))
    }

    /// Migration directory as a path
    pub fn migrations_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.migrations_dir)
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Data Directory:     {}", self.data_dir),
            format!("Migrations:         {}", self.migrations_dir),
            format!("File Prefix:        {}", self.db_prefix),
            format!(
                "Path Override:      {}",
                self.database_path.as_deref().unwrap_or("(none)")
            ),
            format!(
                "Default Guild:      {}",
                self.default_guild_id
                    .as_deref()
                    .unwrap_or(DEFAULT_GUILD_SENTINEL)
            ),
            format!("Busy Timeout:       {} ms", self.busy_timeout_ms),
            format!("Pending Check:      {}", self.pending_check),
        ];

        let mut guilds: Vec<_> = self.guild_paths.iter().collect();
        guilds.sort();
        for (guild_id, path) in guilds {
            lines.push(format!("Guild Override:     {} -> {}", guild_id, path));
        }

        lines.join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.guild-store/guild-store.toml", home_dir)
    }
}

impl ConfigProvider for GuildStoreConfig {
    fn resolve_override_path(&self, guild_id: &str) -> Option<String> {
        self.guild_paths
            .get(guild_id)
            .or(self.database_path.as_ref())
            .cloned()
    }

    fn default_guild_id(&self) -> Option<String> {
        self.default_guild_id.clone()
    }
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest).to_string_lossy().to_string(),
            None => path.to_string(),
        },
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = GuildStoreConfig::default();
        assert_eq!(config.db_prefix, "guild");
        assert_eq!(config.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
        assert_eq!(config.pending_check, PendingCheckPolicy::EveryOpen);
        assert!(config.database_path.is_none());
    }

    #[test]
    fn test_from_map() {
        let config = GuildStoreConfig::from_map(
            &map(&[
                ("data_dir", "/srv/bot/"),
                ("database_path", "/srv/bot/shared.db"),
                ("database_path_42", "/srv/bot/special.db"),
                ("default_guild_id", " 1234 "),
                ("busy_timeout_ms", "250"),
                ("pending_check", "once"),
            ]),
            "/unused".to_string(),
        )
        .unwrap();

        assert_eq!(config.data_dir_path(), PathBuf::from("/srv/bot"));
        assert_eq!(config.default_guild_id.as_deref(), Some("1234"));
        assert_eq!(config.busy_timeout_ms, 250);
        assert_eq!(config.pending_check, PendingCheckPolicy::Once);
        assert_eq!(
            config.resolve_override_path("42").as_deref(),
            Some("/srv/bot/special.db")
        );
        assert_eq!(
            config.resolve_override_path("7").as_deref(),
            Some("/srv/bot/shared.db")
        );
    }

    #[test]
    fn test_from_map_rejects_bad_values() {
        assert!(
            GuildStoreConfig::from_map(&map(&[("busy_timeout_ms", "soon")]), "/d".into()).is_err()
        );
        assert!(
            GuildStoreConfig::from_map(&map(&[("pending_check", "sometimes")]), "/d".into())
                .is_err()
        );
    }

    #[test]
    fn test_empty_values_are_absent() {
        let config =
            GuildStoreConfig::from_map(&map(&[("database_path", "  ")]), "/d".into()).unwrap();
        assert!(config.resolve_override_path("1").is_none());
        assert!(ConfigProvider::default_guild_id(&config).is_none());
    }

    #[test]
    fn test_new_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guild-store.toml");
        std::fs::write(
            &path,
            "data_dir = \"/tmp/guild-data\"\nmigrations_dir = \"/tmp/migrations\"\ndb_prefix = \"server\"\n",
        )
        .unwrap();

        let config = GuildStoreConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        assert_eq!(config.data_dir, "/tmp/guild-data");
        assert_eq!(config.migrations_dir, "/tmp/migrations");
        assert_eq!(config.db_prefix, "server");
    }

    #[test]
    fn test_new_writes_template_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fresh.toml");

        GuildStoreConfig::new(&Some(path.to_string_lossy().to_string())).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("### guild-store configuration file"));
    }

    #[test]
    fn test_pending_check_policy_parse() {
        assert_eq!(
            "never".parse::<PendingCheckPolicy>().unwrap(),
            PendingCheckPolicy::Never
        );
        assert_eq!(
            "EVERY-OPEN".parse::<PendingCheckPolicy>().unwrap(),
            PendingCheckPolicy::EveryOpen
        );
        assert_eq!(PendingCheckPolicy::Once.to_string(), "once");
        assert!("weekly".parse::<PendingCheckPolicy>().is_err());
    }

    #[test]
    fn test_summary() {
        let mut config = GuildStoreConfig::with_data_dir("/test/dir");
        config
            .guild_paths
            .insert("99".to_string(), "/x/99.db".to_string());
        let summary = config.summary();
        assert!(summary.contains("Data Directory:     /test/dir"));
        assert!(summary.contains("Default Guild:      default"));
        assert!(summary.contains("Guild Override:     99 -> /x/99.db"));
    }
}
