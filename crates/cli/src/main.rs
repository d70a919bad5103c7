use std::path::PathBuf;

use clap::{Parser, Subcommand};
use support_core::config::{default_config_path, read_config_yml, read_json_file};
use support_core::{ConfigLogger, LoggingContext};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "adcirc-support", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load the main configuration and start the run log.
    Init {
        /// Configuration file; defaults to ../config/main.yml next to the executable.
        #[arg(short, long, env = "ADCIRC_SUPPORT_CONFIG")]
        config: Option<PathBuf>,
        /// Subdirectory of the log directory for this run.
        #[arg(short, long)]
        instance: Option<String>,
    },
    /// Print a YAML file as JSON.
    ReadYaml { path: PathBuf },
    /// Print a JSON file.
    ReadJson { path: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Init { config, instance } => {
            let path = match config {
                Some(path) => path,
                None => default_config_path()?,
            };

            let mut ctx = LoggingContext::new();
            let cl = match ConfigLogger::from_file(&mut ctx, instance.as_deref(), Some(&path)) {
                Ok(cl) => cl,
                Err(e) => {
                    eprintln!("failed to load configuration {}: {e}", path.display());
                    return Err(e.into());
                }
            };

            match cl.log_file_path() {
                Some(log_file) => {
                    ctx.install_global()?;
                    info!(config = %path.display(), "run log started");
                    println!("Logging to {}", log_file.display());
                }
                None => println!("Logging disabled by configuration"),
            }
        }
        Command::ReadYaml { path } => {
            let doc = read_config_yml(&path)?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Command::ReadJson { path } => {
            let doc = read_json_file(&path)?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
    }

    Ok(())
}
