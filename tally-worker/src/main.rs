use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod classifier;
mod commands;
mod config;

use config::ConfigLoader;

#[derive(Parser)]
#[command(name = "tally-worker", about = "Incremental metric recounts for tally")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file layered over the user and project config
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Recount every subject of a kind
    Recount(commands::recount::RecountArgs),
    /// Print the stored checkpoint of a subject
    Show(commands::show::ShowArgs),
    /// Print period-over-period activity for a tag
    Trend(commands::trend::TrendArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ConfigLoader::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Recount(args) => commands::recount::run(args, &config).await,
        Commands::Show(args) => commands::show::run(args, &config).await,
        Commands::Trend(args) => commands::trend::run(args, &config).await,
        Commands::Config(args) => commands::config::run(args, &config),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use tally_core::SubjectKind;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_recount_flags_parse() {
        let cli = Cli::try_parse_from([
            "tally-worker",
            "recount",
            "--kind",
            "billboard",
            "--watch",
            "--config",
            "/etc/tally.toml",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/tally.toml")));
        match cli.command {
            Commands::Recount(args) => {
                assert_eq!(args.kind, SubjectKind::Billboard);
                assert!(args.watch);
                assert_eq!(args.concurrency, None);
            }
            _ => panic!("expected recount"),
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let parsed = Cli::try_parse_from(["tally-worker", "show", "--kind", "video", "--id", "1"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_verbose_is_global() {
        let cli = Cli::try_parse_from(["tally-worker", "trend", "--id", "rust", "-v"]).unwrap();
        assert!(cli.verbose);
    }
}
