use clap::Args;
use guild_store::{GuildStore, GuildStoreConfig, OutputFormat, DEFAULT_GUILD_SENTINEL};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use super::print_json;

/// Arguments for the Config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Also list guild databases found in the data directory
    #[clap(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Serialize)]
struct ConfigInfo {
    config_file: String,
    data_dir: String,
    data_dir_exists: bool,
    migrations_dir: String,
    migration_count: Option<usize>,
    db_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_path: Option<String>,
    guild_paths: BTreeMap<String, String>,
    default_guild_id: String,
    busy_timeout_ms: u64,
    pending_check: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    guilds: Option<Vec<GuildFileInfo>>,
}

#[derive(Debug, Serialize)]
struct GuildFileInfo {
    guild_id: String,
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
}

pub fn run(config: &GuildStoreConfig, args: ConfigArgs, output_format: OutputFormat) {
    let ConfigArgs { verbose } = args;

    let store = GuildStore::new(config.clone());
    let migration_count = store.migration_source().names().ok().map(|n| n.len());

    let guilds = if verbose {
        match collect_guild_files(&store) {
            Ok(files) => Some(files),
            Err(e) => {
                eprintln!("ERROR: failed to list guild databases: {}", e);
                None
            }
        }
    } else {
        None
    };

    let info = ConfigInfo {
        config_file: GuildStoreConfig::config_file_path(),
        data_dir: config.data_dir.clone(),
        data_dir_exists: config.data_dir_path().exists(),
        migrations_dir: config.migrations_dir.clone(),
        migration_count,
        db_prefix: config.db_prefix.clone(),
        database_path: config.database_path.clone(),
        guild_paths: config
            .guild_paths
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        default_guild_id: config
            .default_guild_id
            .clone()
            .unwrap_or_else(|| DEFAULT_GUILD_SENTINEL.to_string()),
        busy_timeout_ms: config.busy_timeout_ms,
        pending_check: config.pending_check.to_string(),
        guilds,
    };

    if output_format.is_json() {
        print_json(&info, output_format);
        return;
    }

    println!("Configuration:");
    println!("  Config file:        {}", info.config_file);
    for line in config.summary().lines() {
        println!("  {}", line);
    }
    match info.migration_count {
        Some(count) => println!("  Migration Units:    {}", count),
        None => println!("  Migration Units:    (directory not readable)"),
    }

    if let Some(guilds) = &info.guilds {
        println!();
        println!("Guild Databases ({}):", guilds.len());
        for guild in guilds {
            let size = guild
                .size_bytes
                .map(|s| format!("{} bytes", s))
                .unwrap_or_else(|| "-".to_string());
            println!("  {:<24} {} ({})", guild.guild_id, guild.path, size);
        }
    }

    if !info.data_dir_exists {
        println!();
        println!("Data directory does not exist yet; it is created when a guild is first opened.");
    }
}

fn collect_guild_files(store: &GuildStore) -> guild_store::StoreResult<Vec<GuildFileInfo>> {
    let mut files = Vec::new();
    for guild_id in store.known_guilds()? {
        let path = store.registry().resolve_path(&guild_id)?;
        let size_bytes = std::fs::metadata(&path).ok().map(|m| m.len());
        files.push(GuildFileInfo {
            guild_id,
            path: display_path(&path),
            size_bytes,
        });
    }
    Ok(files)
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
