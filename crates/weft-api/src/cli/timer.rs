//! CLI timer subcommands: list, cancel, prune.

use anyhow::{Result, anyhow};
use chrono::Utc;
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;
use weft_core::repository::TimerStore;
use weft_core::timer::TimerManager;
use weft_types::timer::{TimerRecord, TimerStatus};

use super::Output;
use crate::state::AppState;

/// Timer subcommands.
#[derive(Subcommand)]
pub enum TimerCommand {
    /// List timers by fire time.
    #[command(alias = "ls")]
    List {
        /// Filter by status: pending, fired or cancelled.
        #[arg(long)]
        status: Option<TimerStatus>,
    },

    /// Cancel a pending timer.
    Cancel { id: Uuid },

    /// Remove fired timers older than the configured retention window.
    Prune,
}

/// Handle a timer subcommand.
pub async fn handle_timer_command(cmd: TimerCommand, state: &AppState, out: Output) -> Result<()> {
    let manager = TimerManager::with_config(state.timers.clone(), &state.config.timers);
    match cmd {
        TimerCommand::List { status } => handle_list(&manager, status, out).await,
        TimerCommand::Cancel { id } => handle_cancel(&manager, id, out).await,
        TimerCommand::Prune => handle_prune(&manager, out).await,
    }
}

fn summary(t: &TimerRecord) -> serde_json::Value {
    serde_json::json!({
        "id": t.id.to_string(),
        "handler": t.handler,
        "kind": t.kind.as_str(),
        "status": t.status.as_str(),
        "fire_at": t.fire_at.to_rfc3339(),
        "run_id": t.run_id.map(|id| id.to_string()),
        "cron": t.cron,
        "timezone": t.timezone,
        "occurrence": t.occurrence,
        "fired_at": t.fired_at.map(|at| at.to_rfc3339()),
    })
}

fn status_cell(status: TimerStatus) -> Cell {
    let color = match status {
        TimerStatus::Pending => Color::Yellow,
        TimerStatus::Fired => Color::Green,
        TimerStatus::Cancelled => Color::DarkGrey,
    };
    Cell::new(status.as_str()).fg(color)
}

async fn handle_list<S: TimerStore + 'static>(
    manager: &TimerManager<S>,
    status: Option<TimerStatus>,
    out: Output,
) -> Result<()> {
    let timers = manager
        .list(status)
        .await
        .map_err(|e| anyhow!("Failed to list timers: {e}"))?;

    if out.json {
        let rows: Vec<_> = timers.iter().map(summary).collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if out.quiet {
        for t in &timers {
            println!("{}", t.id);
        }
        return Ok(());
    }

    if timers.is_empty() {
        println!();
        println!("  No timers.");
        println!();
        return Ok(());
    }

    let now = Utc::now();
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Handler"),
            Cell::new("Kind"),
            Cell::new("Status"),
            Cell::new("Fire at"),
            Cell::new("Schedule"),
        ]);
    for t in &timers {
        let fire_at = if t.is_due(now) {
            format!("{} (overdue)", t.fire_at.format("%Y-%m-%d %H:%M:%S"))
        } else {
            t.fire_at.format("%Y-%m-%d %H:%M:%S").to_string()
        };
        let schedule = match (&t.cron, &t.timezone) {
            (Some(cron), Some(tz)) => format!("{cron} ({tz}) #{}", t.occurrence),
            (Some(cron), None) => format!("{cron} #{}", t.occurrence),
            _ => String::new(),
        };
        table.add_row(vec![
            Cell::new(t.id),
            Cell::new(&t.handler),
            Cell::new(t.kind.as_str()),
            status_cell(t.status),
            Cell::new(fire_at),
            Cell::new(schedule),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_cancel<S: TimerStore + 'static>(
    manager: &TimerManager<S>,
    id: Uuid,
    out: Output,
) -> Result<()> {
    let cancelled = manager.cancel(id).await?;

    if out.json {
        println!(
            "{}",
            serde_json::json!({ "id": id.to_string(), "cancelled": cancelled })
        );
    } else if out.human() {
        println!();
        if cancelled {
            println!("  {} Cancelled timer {}", style("*").green().bold(), id);
        } else {
            println!("  {} Timer {} was not pending", style("!").yellow().bold(), id);
        }
        println!();
    }
    Ok(())
}

async fn handle_prune<S: TimerStore + 'static>(manager: &TimerManager<S>, out: Output) -> Result<()> {
    let removed = manager.prune(Utc::now()).await?;

    if out.json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else if out.human() {
        println!();
        println!("  {} Removed {removed} fired timer(s)", style("*").green().bold());
        println!();
    }
    Ok(())
}
