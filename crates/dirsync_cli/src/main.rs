//! dirsync CLI
//!
//! Replica-side replication and maintenance for a local LDAP directory.
//!
//! # Commands
//!
//! - `run` - Apply change notifications read as JSON lines
//! - `initialize` - Wipe local state and start the directory server
//! - `clean` - Wipe local state and stop the directory server
//! - `fallback` - Inspect, reset or replay the capture log
//! - `check-disk` - Run the disk space guard once

mod commands;
mod settings;
mod wire;

use clap::{ArgAction, Parser, Subcommand};
use dirsync_engine::ReplicationEngine;
use settings::Overrides;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Replicates directory changes onto the local LDAP server.
#[derive(Parser)]
#[command(name = "dirsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a JSON configuration file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Base DN of the replicated tree
    #[arg(global = true, long)]
    base_dn: Option<String>,

    /// Directory holding markers and the capture log
    #[arg(global = true, long)]
    state_dir: Option<PathBuf>,

    /// Recovery policy for unhandled errors (fallback, restart)
    #[arg(global = true, long)]
    policy: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(global = true, short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply change notifications read as JSON lines
    Run {
        /// Read notifications from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output format for the summary (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Wipe local state, rotate the bind secret and start the directory server
    Initialize,

    /// Wipe local state and stop the directory server
    Clean,

    /// Inspect or leave fallback mode
    Fallback {
        #[command(subcommand)]
        action: FallbackAction,
    },

    /// Check free disk space once
    CheckDisk,

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum FallbackAction {
    /// Show whether changes are being captured
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Archive the capture log and return to live mode
    Reset,

    /// Apply the capture log to the directory, then reset
    Replay,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("dirsync CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("dirsync engine v{}", dirsync_engine::VERSION);
        return Ok(());
    }

    let overrides = Overrides {
        base_dn: cli.base_dn,
        state_dir: cli.state_dir,
        policy: cli.policy,
    };
    let config = settings::load(cli.config.as_deref())?.into_config(overrides)?;
    let mut engine = ReplicationEngine::system(config);

    match cli.command {
        Commands::Run { input, format } => {
            commands::run::run(&mut engine, input.as_deref(), &format)?;
        }
        Commands::Initialize => commands::initialize::run(&mut engine)?,
        Commands::Clean => commands::clean::run(&mut engine)?,
        Commands::Fallback { action } => match action {
            FallbackAction::Status { format } => commands::fallback::status(&mut engine, &format)?,
            FallbackAction::Reset => commands::fallback::reset(&mut engine)?,
            FallbackAction::Replay => commands::fallback::replay(&mut engine)?,
        },
        Commands::CheckDisk => commands::check_disk::run(&mut engine)?,
        Commands::Version => {}
    }

    Ok(())
}
