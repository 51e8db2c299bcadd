use anyhow::Result;
use clap::{Args, Subcommand};

use crate::config::{ConfigLoader, WorkerConfig};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration (merged)
    Show,
    /// Show configuration file paths
    Path,
}

pub fn run(args: ConfigArgs, config: &WorkerConfig) -> Result<()> {
    match args.command {
        ConfigCommands::Show => {
            println!("{}", toml::to_string_pretty(config)?);
        }
        ConfigCommands::Path => {
            println!("User config:    {:?}", ConfigLoader::user_config_path());
            println!("Project config: {:?}", ConfigLoader::project_config_path());
        }
    }
    Ok(())
}
