//! hgserver CLI - Command-line interface
//!
//! This binary provides a command-line interface to the hgserver library:
//! serving a watched directory, inspecting the catalog, and managing the
//! configuration file.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::serve::ServeArgs;

#[derive(Parser)]
#[command(name = "hgserver")]
#[command(version, about = "Serve genomic data files as HiGlass tilesets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a directory, convert its files and serve the tile API
    Serve {
        /// Directory to watch (overrides watch.root)
        root: Option<PathBuf>,

        /// Number of concurrent conversion workers
        #[arg(long)]
        num_worker: Option<usize>,

        /// Seconds between directory scans
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Port for the tile API
        #[arg(long)]
        api_port: Option<u16>,

        /// Address for the tile API
        #[arg(long)]
        api_host: Option<String>,

        /// Directory for converted tilesets and the catalog
        #[arg(long)]
        artifact_dir: Option<PathBuf>,

        /// Enable debug logging
        #[arg(long)]
        debug: bool,
    },

    /// Print a HiGlass view config referencing every servable tileset
    View {
        /// Base URL of a running tile API (defaults to the configured address)
        #[arg(long)]
        api_url: Option<String>,

        /// Directory holding the catalog
        #[arg(long)]
        artifact_dir: Option<PathBuf>,
    },

    /// Show source files, tilesets and conversion jobs from the catalog
    Status {
        /// Directory holding the catalog
        #[arg(long)]
        artifact_dir: Option<PathBuf>,
    },

    /// View and modify configuration settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            root,
            num_worker,
            poll_interval,
            api_port,
            api_host,
            artifact_dir,
            debug,
        } => commands::serve::run(ServeArgs {
            root,
            num_worker,
            poll_interval,
            api_port,
            api_host,
            artifact_dir,
            debug,
        }),
        Commands::View {
            api_url,
            artifact_dir,
        } => commands::view::run(api_url, artifact_dir),
        Commands::Status { artifact_dir } => commands::status::run(artifact_dir),
        Commands::Config { command } => commands::config::run(command),
    };

    if let Err(e) = result {
        e.exit();
    }
}
