//! CLI binary entry point for writeback

#[cfg(feature = "cli")]
use batch_writeback::cli::commands::columns::{ColumnsArgs, handle_columns};
#[cfg(feature = "cli")]
use batch_writeback::cli::commands::init::{InitArgs, handle_init};
#[cfg(feature = "cli")]
use batch_writeback::cli::commands::load::{LoadArgs, handle_load};
#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "writeback")]
#[command(about = "Merge JSON-lines record batches into relational tables")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Write a sample writeback.toml
    Init {
        /// Directory to write the configuration into
        #[arg(default_value = ".")]
        dir: PathBuf,
        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Load JSON-lines records into the configured target table
    Load {
        /// Input file path or '-' for stdin
        #[arg(default_value = "-")]
        input: String,
        /// Configuration file
        #[arg(short, long, default_value = "writeback.toml")]
        config: PathBuf,
        /// Records per batch (default: write.page_size from the configuration)
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Output format for the metrics (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
        /// Print a statement count and total query time to stderr
        #[arg(long)]
        instrument: bool,
    },

    /// Show the live columns of the configured target table
    Columns {
        /// Configuration file
        #[arg(short, long, default_value = "writeback.toml")]
        config: PathBuf,
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
        /// Inspect the staging table instead
        #[arg(long)]
        staging: bool,
    },
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { dir, force } => handle_init(&InitArgs { dir, force }),
        Commands::Load {
            input,
            config,
            batch_size,
            format,
            instrument,
        } => {
            let args = LoadArgs {
                config,
                input,
                batch_size,
                format,
                instrument,
            };
            handle_load(&args)
        }
        Commands::Columns {
            config,
            format,
            staging,
        } => {
            let args = ColumnsArgs {
                config,
                format,
                staging,
            };
            handle_columns(&args)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature is not enabled. Build with --features cli");
    std::process::exit(1);
}
