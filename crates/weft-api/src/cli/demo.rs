//! `weft demo`: a small fan-out/fan-in workflow run against the configured
//! checkpoint store.
//!
//! `fetch` loads a list of numbers, three `score_*` steps weigh it in
//! parallel, `merge` sums their outputs and `publish` runs only when the
//! total is positive. `--fail-at` makes one step fail so the run can be
//! continued later with `--resume`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::Args;
use console::style;
use futures_util::StreamExt;
use serde_json::{Value, json};
use uuid::Uuid;
use weft_core::repository::BoxCheckpointStore;
use weft_core::workflow::{
    Condition, ExecutorError, StepContext, StepError, StepHandler, StepResult, WorkflowDefinition,
    WorkflowError, WorkflowExecutor,
};
use weft_types::event::WorkflowEvent;
use weft_types::workflow::{ExecutionConfig, RunResult, RunStatus};

use super::Output;
use crate::state::AppState;

/// Arguments for `weft demo`.
#[derive(Args, Debug, Default)]
pub struct DemoArgs {
    /// Print events as they happen instead of only the final result.
    #[arg(long)]
    pub stream: bool,

    /// Make the named step fail.
    #[arg(long, value_name = "STEP")]
    pub fail_at: Option<String>,

    /// Continue the run captured by this checkpoint.
    #[arg(long, value_name = "CHECKPOINT_ID")]
    pub resume: Option<Uuid>,
}

pub const WORKFLOW_NAME: &str = "demo";

const SCORE_STEPS: [(&str, f64); 3] = [("score_a", 1.0), ("score_b", 0.5), ("score_c", 2.0)];

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Stage {
    Fetch,
    Score(f64),
    Merge,
    Publish,
}

struct DemoStep {
    stage: Stage,
    fail: bool,
}

impl StepHandler for DemoStep {
    async fn run(&self, ctx: StepContext) -> Result<StepResult, StepError> {
        if self.fail {
            return Err(StepError::failed(format!("{} failed on request", ctx.step())));
        }

        match self.stage {
            Stage::Fetch => {
                let items = json!([3, 1, 4, 1, 5]);
                Ok(StepResult::new(json!({ "items": items.clone() })).with_update("items", items))
            }
            Stage::Score(weight) => {
                let items = ctx
                    .get("items")
                    .and_then(Value::as_array)
                    .ok_or_else(|| StepError::failed("no items in state"))?;
                let mut score = 0.0;
                for (i, item) in items.iter().enumerate() {
                    tokio::select! {
                        _ = ctx.cancellation().cancelled() => return Err(StepError::Cancelled),
                        _ = tokio::time::sleep(Duration::from_millis(20)) => {}
                    }
                    score += item.as_f64().unwrap_or(0.0) * weight;
                    ctx.report_progress(((i + 1) * 100 / items.len()) as f64);
                }
                Ok(StepResult::new(json!(score)).with_update(ctx.step(), json!(score)))
            }
            Stage::Merge => {
                let total: f64 = match ctx.input() {
                    Value::Array(scores) => scores.iter().filter_map(Value::as_f64).sum(),
                    other => other.as_f64().unwrap_or(0.0),
                };
                Ok(StepResult::new(json!({ "total": total })).with_update("total", json!(total)))
            }
            Stage::Publish => {
                let total = ctx.get("total").cloned().unwrap_or(Value::Null);
                Ok(StepResult::new(json!({ "published": total })).with_update("published", json!(true)))
            }
        }
    }
}

/// Build the demo workflow, failing `fail_at` if given.
pub fn demo_workflow(fail_at: Option<&str>) -> Result<WorkflowDefinition, WorkflowError> {
    let step = |name: &str, stage: Stage| DemoStep {
        stage,
        fail: fail_at == Some(name),
    };

    let mut builder = WorkflowDefinition::builder(WORKFLOW_NAME)
        .step("fetch", step("fetch", Stage::Fetch))
        .step("merge", step("merge", Stage::Merge))
        .step("publish", step("publish", Stage::Publish))
        .edges("fetch", SCORE_STEPS.iter().map(|(name, _)| *name));
    for (name, weight) in SCORE_STEPS {
        builder = builder
            .step(name, step(name, Stage::Score(weight)))
            .edge(name, "merge");
    }
    builder
        .when("merge", Condition::expr("total > 0"), ["publish"])
        .build()
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Handle `weft demo`.
pub async fn handle_demo_command(args: DemoArgs, state: &AppState, out: Output) -> Result<()> {
    if let Some(step) = &args.fail_at {
        let known = step == "fetch"
            || step == "merge"
            || step == "publish"
            || SCORE_STEPS.iter().any(|(name, _)| name == step);
        if !known {
            return Err(anyhow!("Unknown demo step '{step}'"));
        }
    }

    let workflow = demo_workflow(args.fail_at.as_deref())?;
    let executor = WorkflowExecutor::new(Arc::clone(&state.checkpoints))
        .with_event_buffer(state.config.executor.event_buffer);
    let config = state
        .config
        .execution_config()
        .with_checkpoints(state.config.executor.checkpoint_granularity);

    tracing::debug!(resume = ?args.resume, stream = args.stream, "running demo workflow");

    let result = if args.stream {
        stream_run(&executor, workflow, args.resume, config, out).await?
    } else {
        let outcome = match args.resume {
            Some(id) => executor.resume(&workflow, id, config).await,
            None => executor.execute(&workflow, None, config).await,
        };
        match outcome {
            Ok(result) => result,
            Err(e) => return report_failure(e, out),
        }
    };

    // A streamed JSON run already printed the result in its last event.
    if !(args.stream && out.json) {
        print_result(&result, out)?;
    }
    if result.status == RunStatus::Failed {
        let step = result.error.as_ref().and_then(|f| f.step.as_deref());
        return Err(anyhow!("Run failed at step '{}'", step.unwrap_or("?")));
    }
    Ok(())
}

async fn stream_run(
    executor: &WorkflowExecutor<BoxCheckpointStore>,
    workflow: WorkflowDefinition,
    resume: Option<Uuid>,
    config: ExecutionConfig,
    out: Output,
) -> Result<RunResult> {
    let workflow = Arc::new(workflow);
    let mut events = match resume {
        Some(id) => executor.stream_resume(workflow, id, config),
        None => executor.stream(workflow, None, config),
    };

    while let Some(event) = events.next().await {
        if out.json {
            println!("{}", serde_json::to_string(&event)?);
        } else if out.human() {
            print_event(&event);
        }
        if let WorkflowEvent::RunCompleted { result } = event {
            return Ok(*result);
        }
    }
    Err(anyhow!("Event stream ended before the run completed"))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::RunStarted {
            run_id, resumed, ..
        } => {
            let verb = if *resumed { "Resumed" } else { "Started" };
            println!("  {} {verb} run {}", style(">").cyan().bold(), style(run_id).dim());
        }
        WorkflowEvent::StepStarted {
            step, iteration, ..
        } => {
            println!("    {} {step} (iteration {iteration})", style("-").dim());
        }
        WorkflowEvent::StepProgress { step, percent, .. } => {
            println!("    {} {step} {percent}%", style("~").dim());
        }
        WorkflowEvent::StepCompleted {
            step,
            duration_ms,
            restored,
            ..
        } => {
            if *restored {
                println!("    {} {step} (from checkpoint)", style("*").dim());
            } else {
                println!("    {} {step} ({duration_ms} ms)", style("*").green());
            }
        }
        WorkflowEvent::StepFailed { step, error, .. } => {
            println!("    {} {step}: {error}", style("x").red().bold());
        }
        WorkflowEvent::RunCompleted { .. } => {}
    }
}

fn status_style(status: RunStatus) -> console::StyledObject<String> {
    let text = status.to_string();
    match status {
        RunStatus::Completed => style(text).green().bold(),
        RunStatus::Failed => style(text).red().bold(),
        _ => style(text).yellow().bold(),
    }
}

fn print_result(result: &RunResult, out: Output) -> Result<()> {
    if out.json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    if out.quiet {
        println!("{}", result.run_id);
        return Ok(());
    }

    println!();
    println!(
        "  Run {} {} in {} iteration(s), {} ms",
        style(result.run_id).cyan(),
        status_style(result.status),
        result.iterations,
        result.duration_ms
    );
    println!(
        "  Completed: {}",
        result.completed_steps.iter().cloned().collect::<Vec<_>>().join(", ")
    );
    if let Some(total) = result.state.get("total") {
        println!("  Total:     {total}");
    }
    if !result.pending.is_empty() {
        println!("  Pending:   {}", result.pending.join(", "));
    }
    if let Some(failure) = &result.error {
        println!("  Error:     {}", failure.message);
    }
    if let Some(id) = result.last_checkpoint {
        println!("  Checkpoint: {id}");
        if result.status != RunStatus::Completed {
            println!("  Resume with: {}", style(format!("weft demo --resume {id}")).dim());
        }
    }
    println!();
    Ok(())
}

fn report_failure(error: ExecutorError, out: Output) -> Result<()> {
    if let Some(partial) = error.partial() {
        print_result(partial, out)?;
    }
    Err(error.into())
}
