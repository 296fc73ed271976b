// Backup Validator - Main Entry Point
//
// Loads configuration, sets up logging and serves the HTTP bridge until
// interrupted.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use backup_validator::config::{Config, DEFAULT_CONFIG_FILE};
use backup_validator::logging::LogLevel;
use backup_validator::server;
use clap::Parser;
use tracing::info;

/// Backup Validator: run local validation scripts over HTTP
#[derive(Parser, Debug)]
#[command(name = "backup-validator")]
#[command(author = "Backup Validator Contributors")]
#[command(version = "0.1.0")]
#[command(about = "HTTP bridge for allow-listed backup validation scripts", long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Address to bind (overrides config and environment)
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides config and environment)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory holding the scripts
    #[arg(long)]
    scripts_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(self, mut config: Config) -> Config {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = self.scripts_dir {
            config.scripts.root = dir;
        }
        if self.verbose {
            config.logging.level = LogLevel::Debug;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load_from_path(&args.config)?;
    let config = args.apply(config);
    config.validate()?;

    config
        .effective_logging()
        .init()
        .context("Failed to initialize logging")?;

    if !config.scripts.root.exists() {
        fs::create_dir_all(&config.scripts.root).with_context(|| {
            format!(
                "Failed to create scripts directory {:?}",
                config.scripts.root
            )
        })?;
        info!("Created scripts directory {:?}", config.scripts.root);
    }

    info!("Backup Validator v{} starting...", env!("CARGO_PKG_VERSION"));

    server::run_server(&config).await
}
