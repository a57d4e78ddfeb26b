//! CLI interface for Maestro
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for controlling the engine.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Maestro domain-orchestration engine
///
/// A tick-driven control loop that runs every registered domain controller
/// through observe → decide → act → report once per heartbeat pulse.
#[derive(Parser, Debug)]
#[command(name = "maestro")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the engine in the foreground until interrupted
    Start,

    /// Run one or more orchestration cycles manually
    Tick {
        /// Number of cycles to run
        #[arg(short = 'n', long, default_value = "1")]
        count: u64,
    },

    /// Show engine configuration and store counters
    Status,

    /// Show recent trajectory steps
    History {
        /// Number of steps to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: i64,
    },

    /// Show recent plan trees
    Plans {
        /// Number of trees to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: i64,
    },
}
