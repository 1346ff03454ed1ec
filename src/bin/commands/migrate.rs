use clap::{Args, Subcommand};
use guild_store::database::AppliedMigration;
use guild_store::{GuildDatabase, GuildStore, GuildStoreConfig, OutputFormat, StoreResult};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::info;

use super::print_json;

/// Arguments for the Migrate command
#[derive(Args)]
pub struct MigrateArgs {
    #[clap(subcommand)]
    pub command: MigrateCommands,
}

/// Guild selection shared by `run` and `status`
#[derive(Args, Debug)]
pub struct GuildSelection {
    /// Guild id to operate on; may be repeated. Defaults to the default guild
    #[clap(short, long = "guild", value_name = "GUILD_ID")]
    pub guilds: Vec<String>,

    /// Operate on every guild with a database in the data directory
    #[clap(long, short)]
    pub all: bool,
}

#[derive(Subcommand)]
pub enum MigrateCommands {
    /// Apply pending migrations, stopping at the first failure per guild
    Run {
        #[clap(flatten)]
        selection: GuildSelection,
    },

    /// Show applied and pending migrations
    Status {
        #[clap(flatten)]
        selection: GuildSelection,
    },

    /// Create the next migration file from a description
    New {
        /// Short description, e.g. "add character level"
        #[clap(value_name = "DESCRIPTION", required = true)]
        description: Vec<String>,
    },
}

#[derive(Tabled)]
struct RunRow {
    guild: String,
    status: &'static str,
    count: usize,
    applied: String,
    failed_unit: String,
    error: String,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    guild_id: String,
    success: bool,
    count: usize,
    applied: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct AppliedEntry {
    name: String,
    applied_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    applied_time: Option<String>,
}

impl From<&AppliedMigration> for AppliedEntry {
    fn from(migration: &AppliedMigration) -> Self {
        Self {
            name: migration.name.clone(),
            applied_at: migration.applied_at,
            applied_time: migration
                .applied_time()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusSummary {
    guild_id: String,
    database_exists: bool,
    applied_count: usize,
    applied: Vec<AppliedEntry>,
    pending_count: usize,
    pending: Vec<String>,
}

#[derive(Tabled)]
struct StatusRow {
    guild: String,
    applied: usize,
    applied_units: String,
    pending: usize,
    pending_units: String,
}

pub fn run(config: GuildStoreConfig, args: MigrateArgs, output_format: OutputFormat) {
    let store = GuildStore::new(config);

    let ok = match args.command {
        MigrateCommands::Run { selection } => run_migrations(&store, &selection, output_format),
        MigrateCommands::Status { selection } => run_status(&store, &selection, output_format),
        MigrateCommands::New { description } => run_new(&store, &description.join(" ")),
    };

    store.shutdown();
    if !ok {
        std::process::exit(1);
    }
}

/// Guild ids to operate on
///
/// Explicit `--guild` ids and, with `--all`, every discovered guild. Only
/// when neither was given does the default guild stand in; `--all` that
/// discovers nothing yields no targets.
fn resolve_targets(store: &GuildStore, selection: &GuildSelection) -> StoreResult<Vec<String>> {
    let mut targets = selection.guilds.clone();
    if selection.all {
        targets.extend(store.known_guilds()?);
    } else if targets.is_empty() {
        targets.push(store.default_database().resolve_guild_id()?);
    }
    targets.sort();
    targets.dedup();
    Ok(targets)
}

fn run_migrations(store: &GuildStore, selection: &GuildSelection, output_format: OutputFormat) -> bool {
    let targets = match resolve_targets(store, selection) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return false;
        }
    };
    if targets.is_empty() {
        if output_format.is_json() {
            print_json(&Vec::<RunSummary>::new(), output_format);
        } else {
            println!("No guild databases found in {}", store.config().data_dir);
        }
        return true;
    }

    let summaries: Vec<RunSummary> = targets
        .into_iter()
        .map(|guild_id| {
            info!("applying pending migrations for guild {}", guild_id);
            match store.migrate(&guild_id) {
                Ok(report) => {
                    let (failed_unit, error) = match &report.failure {
                        Some(failure) => (Some(failure.name.clone()), Some(failure.error.to_string())),
                        None => (None, None),
                    };
                    RunSummary {
                        guild_id,
                        success: report.is_success(),
                        count: report.count,
                        applied: report.applied_names,
                        failed_unit,
                        error,
                    }
                }
                // the guild could not be opened or its source is inconsistent
                Err(e) => RunSummary {
                    guild_id,
                    success: false,
                    count: 0,
                    applied: vec![],
                    failed_unit: None,
                    error: Some(e.to_string()),
                },
            }
        })
        .collect();

    let all_ok = summaries.iter().all(|s| s.success);

    if output_format.is_json() {
        print_json(&summaries, output_format);
    } else {
        let rows: Vec<RunRow> = summaries
            .iter()
            .map(|s| RunRow {
                guild: s.guild_id.clone(),
                status: if s.success { "ok" } else { "failed" },
                count: s.count,
                applied: s.applied.join(", "),
                failed_unit: s.failed_unit.clone().unwrap_or_default(),
                error: s.error.clone().unwrap_or_default(),
            })
            .collect();
        print_table(rows, output_format);

        let failed = summaries.iter().filter(|s| !s.success).count();
        if failed > 0 {
            eprintln!("{} of {} guild(s) failed to migrate", failed, summaries.len());
        }
    }

    all_ok
}

/// Status of each target guild; guilds without a database are reported, not created
fn collect_status(store: &GuildStore, targets: Vec<String>) -> StoreResult<Vec<StatusSummary>> {
    let mut summaries = Vec::with_capacity(targets.len());
    for guild_id in targets {
        if !store.has_database(&guild_id)? {
            summaries.push(StatusSummary {
                guild_id,
                database_exists: false,
                applied_count: 0,
                applied: vec![],
                pending_count: 0,
                pending: vec![],
            });
            continue;
        }

        let status = store.migration_status(&guild_id)?;
        let applied = store.applied_migrations(&guild_id)?;
        summaries.push(StatusSummary {
            guild_id,
            database_exists: true,
            applied_count: status.applied.count,
            applied: applied.iter().map(AppliedEntry::from).collect(),
            pending_count: status.pending.count,
            pending: status.pending.names,
        });
    }
    Ok(summaries)
}

fn run_status(store: &GuildStore, selection: &GuildSelection, output_format: OutputFormat) -> bool {
    let summaries = match resolve_targets(store, selection)
        .and_then(|targets| collect_status(store, targets))
    {
        Ok(s) => s,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return false;
        }
    };

    if output_format.is_json() {
        print_json(&summaries, output_format);
        return true;
    }

    if summaries.is_empty() {
        println!("No guild databases found in {}", store.config().data_dir);
        return true;
    }

    let rows: Vec<StatusRow> = summaries
        .iter()
        .map(|s| StatusRow {
            guild: s.guild_id.clone(),
            applied: s.applied_count,
            applied_units: if s.database_exists {
                s.applied
                    .iter()
                    .map(|a| match &a.applied_time {
                        Some(time) => format!("{} ({})", a.name, time),
                        None => a.name.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            } else {
                "(no database)".to_string()
            },
            pending: s.pending_count,
            pending_units: s.pending.join(", "),
        })
        .collect();
    print_table(rows, output_format);

    true
}

fn run_new(store: &GuildStore, description: &str) -> bool {
    match store.create_migration(description) {
        Ok(path) => {
            println!("Created {}", path.display());
            true
        }
        Err(e) => {
            eprintln!("ERROR: {}", e);
            false
        }
    }
}

fn print_table<T: Tabled>(rows: Vec<T>, output_format: OutputFormat) {
    match output_format {
        OutputFormat::Markdown => println!("{}", Table::new(rows).with(Style::markdown())),
        _ => println!("{}", Table::new(rows).with(Style::rounded())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn store(dir: &TempDir) -> GuildStore {
        let mut config = GuildStoreConfig::with_data_dir(dir.path().join("data").to_string_lossy());
        config.migrations_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/migrations").to_string();
        GuildStore::new(config)
    }

    fn selection(guilds: &[&str], all: bool) -> GuildSelection {
        GuildSelection {
            guilds: guilds.iter().map(|g| g.to_string()).collect(),
            all,
        }
    }

    #[test]
    fn test_targets_default_guild_without_selection() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        assert_eq!(
            resolve_targets(&store, &selection(&[], false)).unwrap(),
            vec!["default"]
        );
    }

    #[test]
    fn test_targets_all_with_no_guilds_is_empty() {
        let dir = tempdir().unwrap();
        let store = store(&dir);

        assert!(resolve_targets(&store, &selection(&[], true))
            .unwrap()
            .is_empty());
        assert!(run_migrations(&store, &selection(&[], true), OutputFormat::Json));
        assert!(!store.has_database("default").unwrap());
        assert!(store.known_guilds().unwrap().is_empty());
    }

    #[test]
    fn test_targets_all_merges_explicit_guilds() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        store.connection("222").unwrap();
        store.connection("111").unwrap();

        assert_eq!(
            resolve_targets(&store, &selection(&["333", "111"], true)).unwrap(),
            vec!["111", "222", "333"]
        );
    }

    #[test]
    fn test_status_does_not_create_unknown_guild() {
        let dir = tempdir().unwrap();
        let store = store(&dir);
        store.migrate("111").unwrap();

        let summaries = collect_status(&store, vec!["111".into(), "typo".into()]).unwrap();
        assert!(summaries[0].database_exists);
        assert_eq!(summaries[0].applied_count, 3);
        assert_eq!(summaries[0].applied[0].name, "001_create_characters.sql");
        assert!(summaries[0].applied[0].applied_time.is_some());

        assert!(!summaries[1].database_exists);
        assert!(!store.has_database("typo").unwrap());
        assert!(!store.registry().resolve_path("typo").unwrap().exists());
    }
}
