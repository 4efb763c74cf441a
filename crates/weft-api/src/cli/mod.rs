//! CLI command definitions for the `weft` binary.
//!
//! Uses clap derive macros for argument parsing. Commands are grouped by
//! noun (e.g., `weft cron next`, `weft checkpoint list`).

pub mod checkpoint;
pub mod cron;
pub mod demo;
pub mod timer;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run and inspect weft workflows, checkpoints, timers and cron schedules.
#[derive(Parser)]
#[command(name = "weft", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Data directory (defaults to $WEFT_DATA_DIR or ~/.weft).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Evaluate cron expressions (next occurrences, matching).
    Cron {
        #[command(subcommand)]
        action: cron::CronCommand,
    },

    /// Inspect and manage stored checkpoints.
    #[command(alias = "cp")]
    Checkpoint {
        #[command(subcommand)]
        action: checkpoint::CheckpointCommand,
    },

    /// Inspect and manage durable timers.
    Timer {
        #[command(subcommand)]
        action: timer::TimerCommand,
    },

    /// Run the built-in fan-out/fan-in demo workflow.
    Demo(demo::DemoArgs),
}

/// Output options shared by every command.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    /// Whether styled, human-readable text should be printed.
    pub fn human(&self) -> bool {
        !self.json && !self.quiet
    }
}
