//! tunnelwatch CLI binary
//!
//! Supervises the DNS capture producer, tails its log and runs the tunneling
//! classifier on demand.

use clap::{Parser, Subcommand};
use cli::{CliError, Result};
use std::path::PathBuf;
use tracing::error;
use tunnelwatch_core::{load_config_from_toml_path, platform_adapter, MonitorConfig};

#[derive(Parser)]
#[command(name = "tunnelwatch")]
#[command(about = "Capture DNS traffic and flag likely tunneling")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to a TOML configuration file
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Project directory holding the scripts, model and CSV files
    #[arg(long, value_name = "DIR", global = true)]
    project_root: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive monitor (default)
    Monitor,
    /// Run the classifier once and print suspicious queries
    Analyze {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print captured queries and the last analysis results
    Show {
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(cli: &Cli) -> Result<MonitorConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from_toml_path(path)?,
        None => MonitorConfig::default(),
    };
    if let Some(root) = &cli.project_root {
        config.project_root = root.clone();
    }
    if config.project_root.is_relative() {
        let cwd = std::env::current_dir().map_err(|e| {
            CliError::ConfigError(format!("Cannot resolve current directory: {}", e))
        })?;
        config.project_root = cwd.join(&config.project_root);
    }
    if !config.project_root.is_dir() {
        return Err(CliError::InvalidArgument(format!(
            "project root {} is not a directory",
            config.project_root.display()
        )));
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let adapter = platform_adapter();
    let mut stdout = std::io::stdout();

    match cli.command.unwrap_or(Commands::Monitor) {
        Commands::Monitor => cli::console::run_interactive(config, adapter).await,
        Commands::Analyze { json } => cli::analyze_once(&config, adapter, json, &mut stdout).await,
        Commands::Show { json } => cli::show_once(&config, json, &mut stdout),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = tunnelwatch_core::utils::init_tracing(&cli.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli).await {
        error!("Command failed [{}]: {}", e.code(), e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
