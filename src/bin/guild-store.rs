#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use clap::{Parser, Subcommand};
use guild_store::*;
use tracing::Level;

mod commands;

use commands::config::ConfigArgs;
use commands::migrate::MigrateArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.guild-store/guild-store.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long, global = true)]
    debug: bool,

    /// Output format: table (default), markdown, json, json-pretty
    #[clap(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and apply per-guild schema migrations
    Migrate(MigrateArgs),

    /// Show resolved configuration
    Config(ConfigArgs),
}

/// Warnings such as pending migrations always show; `--debug` adds info
fn log_level(debug: bool) -> Level {
    if debug {
        Level::INFO
    } else {
        Level::WARN
    }
}

fn main() {
    let cli = Cli::parse();

    // stderr, so JSON on stdout stays parseable
    tracing_subscriber::fmt()
        .with_max_level(log_level(cli.debug))
        .with_writer(std::io::stderr)
        .init();

    let config = match GuildStoreConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Migrate(args) => commands::migrate::run(config, args, cli.format),
        Commands::Config(args) => commands::config::run(&config, args, cli.format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(false), Level::WARN);
        assert_eq!(log_level(true), Level::INFO);
    }

    #[test]
    fn test_cli_parses_migrate_all() {
        let cli = Cli::try_parse_from(["guild-store", "--format", "json", "migrate", "run", "--all"])
            .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Migrate(_)));
    }
}
