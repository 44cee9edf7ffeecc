//! bandsync CLI
//!
//! Command-line tools for inspecting and exercising activity sync state.
//!
//! # Commands
//!
//! - `checkpoint` - Show, set or clear per-device checkpoints
//! - `profiles` - List the device profile registry in match order
//! - `log` - Dump the raw activity log
//! - `replay` - Run a recorded control/data trace through the fetch engine

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// bandsync command-line tools.
#[derive(Parser)]
#[command(name = "bandsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding checkpoints.cbor and activity.log
    #[arg(global = true, short, long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show, set or clear per-device checkpoints
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// List device profiles in match order
    Profiles {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump the raw activity log
    Log {
        /// Only show records from this device
        #[arg(long)]
        device: Option<String>,

        /// Maximum number of records to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Replay a recorded trace through the fetch engine
    Replay {
        /// Device identifier
        #[arg(long)]
        device: String,

        /// Advertised device name, resolved against the profile registry
        #[arg(long, conflicts_with = "family")]
        name: Option<String>,

        /// Device family, bypassing name matching
        #[arg(long)]
        family: Option<String>,

        /// Trace file with `C <hex>` and `D <hex>` lines
        #[arg(short, long)]
        trace: PathBuf,

        /// Abort on packet counter gaps
        #[arg(long)]
        strict: bool,

        /// Device timestamps are UTC rather than local time
        #[arg(long)]
        utc: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Show checkpoints
    Show {
        /// Only show this device
        device: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Set a device checkpoint
    Set {
        /// Device identifier
        device: String,

        /// RFC 3339 timestamp, e.g. 2024-05-01T06:00:00Z
        timestamp: String,
    },

    /// Remove a device checkpoint
    Clear {
        /// Device identifier
        device: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Checkpoint { action } => {
            let dir = cli.data_dir.ok_or("Data directory required for checkpoint")?;
            match action {
                CheckpointAction::Show { device, format } => {
                    commands::checkpoint::show(&dir, device.as_deref(), &format)?;
                }
                CheckpointAction::Set { device, timestamp } => {
                    commands::checkpoint::set(&dir, &device, &timestamp)?;
                }
                CheckpointAction::Clear { device } => {
                    commands::checkpoint::clear(&dir, &device)?;
                }
            }
        }
        Commands::Profiles { format } => {
            commands::profiles::run(&format)?;
        }
        Commands::Log {
            device,
            limit,
            format,
        } => {
            let dir = cli.data_dir.ok_or("Data directory required for log")?;
            commands::log::run(&dir, device.as_deref(), limit, &format)?;
        }
        Commands::Replay {
            device,
            name,
            family,
            trace,
            strict,
            utc,
            format,
        } => {
            let options = commands::replay::ReplayOptions {
                device,
                name,
                family,
                strict,
                utc,
            };
            commands::replay::run(cli.data_dir.as_deref(), &trace, &options, &format)?;
        }
        Commands::Version => {
            println!("bandsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("bandsync engine v{}", bandsync_engine::VERSION);
        }
    }

    Ok(())
}
