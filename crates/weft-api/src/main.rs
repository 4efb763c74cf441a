//! weft CLI entry point.
//!
//! Binary name: `weft`
//!
//! Parses CLI arguments, loads `config.toml` from the data directory,
//! initializes tracing and the stores, then dispatches to the command
//! handler.

mod cli;
mod state;

use anyhow::anyhow;
use clap::Parser;
use weft_infra::config::load_engine_config;
use weft_infra::filesystem::resolve_data_dir;
use weft_observe::tracing_setup::{
    TracingOptions, init_tracing, shutdown_tracing, verbosity_filter,
};

use cli::{Cli, Commands, Output};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let out = Output {
        json: cli.json,
        quiet: cli.quiet,
    };

    let data_dir = resolve_data_dir(cli.data_dir.as_deref());
    let config = load_engine_config(&data_dir).await;

    // RUST_LOG still wins over both.
    let filter = if cli.quiet {
        "error"
    } else {
        verbosity_filter(cli.verbose)
    };
    let options = TracingOptions::from(&config.logging).with_filter(filter);
    init_tracing(&options).map_err(|e| anyhow!("failed to initialize tracing: {e}"))?;

    let result = run(cli.command, data_dir, config, out).await;
    shutdown_tracing();
    result
}

async fn run(
    command: Commands,
    data_dir: std::path::PathBuf,
    config: weft_types::config::EngineConfig,
    out: Output,
) -> anyhow::Result<()> {
    // Cron evaluation needs no stores
    if let Commands::Cron { action } = command {
        return cli::cron::handle_cron_command(action, out);
    }

    let state = AppState::init(data_dir, config).await?;

    match command {
        Commands::Cron { .. } => Ok(()),
        Commands::Checkpoint { action } => {
            cli::checkpoint::handle_checkpoint_command(action, &state, out).await
        }
        Commands::Timer { action } => cli::timer::handle_timer_command(action, &state, out).await,
        Commands::Demo(args) => cli::demo::handle_demo_command(args, &state, out).await,
    }
}
