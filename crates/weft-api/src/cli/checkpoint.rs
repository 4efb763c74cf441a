//! CLI checkpoint subcommands: list, show, delete, prune.

use anyhow::{Result, anyhow};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;
use weft_core::repository::CheckpointStore;
use weft_types::workflow::Checkpoint;

use super::Output;
use crate::state::AppState;

/// Checkpoint subcommands.
#[derive(Subcommand)]
pub enum CheckpointCommand {
    /// List checkpoints, newest first.
    #[command(alias = "ls")]
    List {
        /// Only checkpoints of this run.
        #[arg(long)]
        run: Option<Uuid>,
    },

    /// Show a checkpoint's state, completed steps and outputs.
    Show { id: Uuid },

    /// Delete a checkpoint.
    #[command(alias = "rm")]
    Delete { id: Uuid },

    /// Keep only the newest checkpoints of every run.
    Prune {
        /// Checkpoints to keep per run.
        #[arg(long, default_value = "1")]
        keep: usize,
    },
}

/// Handle a checkpoint subcommand.
pub async fn handle_checkpoint_command(
    cmd: CheckpointCommand,
    state: &AppState,
    out: Output,
) -> Result<()> {
    let store = state.checkpoints.as_ref();
    match cmd {
        CheckpointCommand::List { run } => handle_list(store, run, out).await,
        CheckpointCommand::Show { id } => handle_show(store, id, out).await,
        CheckpointCommand::Delete { id } => handle_delete(store, id, out).await,
        CheckpointCommand::Prune { keep } => handle_prune(store, keep, out).await,
    }
}

fn summary(cp: &Checkpoint) -> serde_json::Value {
    serde_json::json!({
        "id": cp.id.to_string(),
        "run_id": cp.run_id.to_string(),
        "workflow": cp.workflow_name,
        "iteration": cp.iteration,
        "completed_steps": cp.completed_steps,
        "created_at": cp.created_at.to_rfc3339(),
    })
}

async fn handle_list(store: &impl CheckpointStore, run: Option<Uuid>, out: Output) -> Result<()> {
    let checkpoints = store
        .list(run.as_ref())
        .await
        .map_err(|e| anyhow!("Failed to list checkpoints: {e}"))?;

    if out.json {
        let rows: Vec<_> = checkpoints.iter().map(summary).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if out.quiet {
        for cp in &checkpoints {
            println!("{}", cp.id);
        }
        return Ok(());
    }

    if checkpoints.is_empty() {
        println!();
        println!("  No checkpoints stored.");
        println!("  Create some with: {}", style("weft demo").dim());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Run"),
            Cell::new("Workflow"),
            Cell::new("Iteration"),
            Cell::new("Completed"),
            Cell::new("Created"),
        ]);
    for cp in &checkpoints {
        table.add_row(vec![
            Cell::new(cp.id),
            Cell::new(cp.run_id),
            Cell::new(&cp.workflow_name),
            Cell::new(cp.iteration),
            Cell::new(cp.completed_steps.len()),
            Cell::new(cp.created_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_show(store: &impl CheckpointStore, id: Uuid, out: Output) -> Result<()> {
    let cp = store
        .load(&id)
        .await
        .map_err(|e| anyhow!("Failed to load checkpoint: {e}"))?
        .ok_or_else(|| anyhow!("Checkpoint '{id}' not found"))?;

    if !out.human() {
        println!("{}", serde_json::to_string_pretty(&cp)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Checkpoint {}",
        style("*").green().bold(),
        style(cp.id).cyan()
    );
    println!("  Run:       {}", cp.run_id);
    println!("  Workflow:  {}", cp.workflow_name);
    println!("  Iteration: {}", cp.iteration);
    println!("  Created:   {}", cp.created_at.to_rfc3339());
    println!(
        "  Completed: {}",
        cp.completed_steps.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    println!();
    println!("  {}", style("State").bold());
    println!("{}", indent(&serde_json::to_string_pretty(&cp.state)?));
    println!();
    println!("  {}", style("Outputs").bold());
    println!("{}", indent(&serde_json::to_string_pretty(&cp.outputs)?));
    println!();
    Ok(())
}

async fn handle_delete(store: &impl CheckpointStore, id: Uuid, out: Output) -> Result<()> {
    let deleted = store
        .delete(&id)
        .await
        .map_err(|e| anyhow!("Failed to delete checkpoint: {e}"))?;
    if !deleted {
        return Err(anyhow!("Checkpoint '{id}' not found"));
    }

    if out.json {
        println!("{}", serde_json::json!({ "deleted": id.to_string() }));
    } else if out.human() {
        println!();
        println!("  {} Deleted checkpoint {}", style("*").green().bold(), id);
        println!();
    }
    Ok(())
}

async fn handle_prune(store: &impl CheckpointStore, keep: usize, out: Output) -> Result<()> {
    let removed = store
        .prune(keep)
        .await
        .map_err(|e| anyhow!("Failed to prune checkpoints: {e}"))?;

    if out.json {
        println!("{}", serde_json::json!({ "removed": removed, "keep": keep }));
    } else if out.human() {
        println!();
        println!(
            "  {} Removed {removed} checkpoint(s), kept newest {keep} per run",
            style("*").green().bold()
        );
        println!();
    }
    Ok(())
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
