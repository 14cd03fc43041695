//! carstore CLI
//!
//! Drives a persistence context from the command line for local checks.

use carstore_core::{default_log_level, init_logging, ContextOptions};
use clap::{Parser, Subcommand};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "carstore")]
#[command(about = "carstore - manage the Cars collection", long_about = None)]
struct Cli {
    /// Connection string, e.g. `Data Source=cars.db;Conflict Policy=reject-stale`
    #[arg(
        long,
        global = true,
        env = "CARSTORE_CONNECTION",
        default_value = "Data Source=carstore.db"
    )]
    connection: String,

    /// Absolute directory for rolling log files; logging is off when unset
    #[arg(long, global = true)]
    log_dir: Option<String>,

    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Add a car from a JSON object of attributes
    Add(commands::AddArgs),
    /// Print one car as JSON
    Get(commands::IdArgs),
    /// List cars, optionally filtered by attribute equality
    List(commands::ListArgs),
    /// Replace the attributes of a car
    Update(commands::UpdateArgs),
    /// Remove a car
    Remove(commands::IdArgs),
    /// Print the number of stored cars
    Count,
    /// Print the core crate version
    Version,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(log_dir) = cli.log_dir.as_deref() {
        let level = cli
            .log_level
            .unwrap_or_else(|| default_log_level().as_str().to_string());
        init_logging(&level, log_dir)?;
    }

    if let Commands::Version = cli.command {
        println!("carstore_core version={}", carstore_core::core_version());
        return Ok(());
    }

    let options = ContextOptions::from_connection_string(&cli.connection)?;
    match cli.command {
        Commands::Add(args) => commands::add(options, args),
        Commands::Get(args) => commands::get(options, args),
        Commands::List(args) => commands::list(options, args),
        Commands::Update(args) => commands::update(options, args),
        Commands::Remove(args) => commands::remove(options, args),
        Commands::Count => commands::count(options),
        Commands::Version => Ok(()),
    }
}
