mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "schemastep", version, about = "Versioned schema migrations for SQL databases")]
struct Cli {
    /// Log executed SQL and client commands
    #[arg(short, long, global = true)]
    debug: bool,

    /// Config file (YAML or TOML)
    #[arg(short = 'f', long = "file", global = true, env = "SCHEMASTEP_CONFIG")]
    file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter config file
    Init,
    /// Print every configured setting
    Config,
    /// Show the current version and pending migrations
    Status {
        /// Databases to inspect (default: all)
        databases: Vec<String>,
    },
    /// Create a new empty migration file
    Create {
        /// Migration name, e.g. add_users
        name: String,
    },
    /// Apply every pending migration
    Migrate {
        databases: Vec<String>,
    },
    /// Apply the next pending migration
    Up {
        databases: Vec<String>,
    },
    /// Revert the current migration
    Down {
        databases: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config_path = cli
        .file
        .unwrap_or_else(schemastep_config::ConfigLoader::default_path);

    match cli.command {
        Commands::Init => commands::init(&config_path),
        Commands::Config => commands::show_config(&config_path),
        Commands::Status { databases } => commands::status(&config_path, &databases),
        Commands::Create { name } => commands::create(&config_path, &name),
        Commands::Migrate { databases } => commands::migrate(&config_path, &databases),
        Commands::Up { databases } => commands::up(&config_path, &databases),
        Commands::Down { databases } => commands::down(&config_path, &databases),
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
