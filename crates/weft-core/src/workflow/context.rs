//! Execution context handed to every step invocation.
//!
//! `StepContext` is the only channel between the executor and a step's work
//! function: it carries a read-only copy of the run state, the assembled
//! input, the run id and iteration, a cancellation token, and a progress
//! reporter. Nothing is captured implicitly.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use weft_types::workflow::State;

use super::frontier::FrontierEvent;

// ---------------------------------------------------------------------------
// ProgressReporter
// ---------------------------------------------------------------------------

/// Forwards a step's progress reports to the run loop.
///
/// Reports never block and never affect execution order. A reporter whose
/// run has finished silently drops reports.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    step: String,
    sender: Option<mpsc::UnboundedSender<FrontierEvent>>,
}

impl ProgressReporter {
    pub(crate) fn new(step: String, sender: mpsc::UnboundedSender<FrontierEvent>) -> Self {
        Self {
            step,
            sender: Some(sender),
        }
    }

    /// A reporter that discards everything.
    pub fn disabled(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            sender: None,
        }
    }

    /// Report progress, clamped to 0..=100. NaN reports as 0.
    pub fn report(&self, percent: f64, message: Option<String>) {
        let Some(sender) = &self.sender else {
            return;
        };
        let _ = sender.send(FrontierEvent::Progress {
            step: self.step.clone(),
            percent: clamp_percent(percent),
            message,
        });
    }
}

fn clamp_percent(percent: f64) -> u8 {
    if percent.is_nan() {
        0
    } else {
        percent.clamp(0.0, 100.0).round() as u8
    }
}

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// Everything a step invocation may observe.
#[derive(Debug, Clone)]
pub struct StepContext {
    run_id: Uuid,
    workflow_name: Arc<str>,
    step: String,
    iteration: u32,
    state: Arc<State>,
    input: Value,
    cancel: CancellationToken,
    progress: ProgressReporter,
}

impl StepContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        run_id: Uuid,
        workflow_name: Arc<str>,
        step: String,
        iteration: u32,
        state: Arc<State>,
        input: Value,
        cancel: CancellationToken,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            run_id,
            workflow_name,
            step,
            iteration,
            state,
            input,
            cancel,
            progress,
        }
    }

    /// A context outside of any run: empty state, fresh token, progress
    /// discarded. Useful for exercising a handler on its own.
    pub fn detached(step: impl Into<String>, input: Value) -> Self {
        let step = step.into();
        Self {
            run_id: Uuid::nil(),
            workflow_name: Arc::from(""),
            progress: ProgressReporter::disabled(step.clone()),
            step,
            iteration: 0,
            state: Arc::new(State::new()),
            input,
            cancel: CancellationToken::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    /// 1-based frontier iteration this invocation belongs to.
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// Read-only snapshot of the run state at the start of the iteration.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Convenience accessor for a top-level state key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    /// Output of this step's dependencies: `Null` with none, the single
    /// output with one, a list in declaration order with several.
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Token cancelled when the run is cancelled or the batch failed.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Report progress (0-100, clamped).
    pub fn report_progress(&self, percent: f64) {
        self.progress.report(percent, None);
    }

    pub fn report_progress_with(&self, percent: f64, message: impl Into<String>) {
        self.progress.report(percent, Some(message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clamps_progress() {
        assert_eq!(clamp_percent(-5.0), 0);
        assert_eq!(clamp_percent(42.4), 42);
        assert_eq!(clamp_percent(99.6), 100);
        assert_eq!(clamp_percent(250.0), 100);
        assert_eq!(clamp_percent(f64::NAN), 0);
    }

    #[test]
    fn reporter_forwards_clamped_progress() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new("fetch".to_string(), tx);
        reporter.report(140.0, Some("almost".to_string()));

        match rx.try_recv().unwrap() {
            FrontierEvent::Progress {
                step,
                percent,
                message,
            } => {
                assert_eq!(step, "fetch");
                assert_eq!(percent, 100);
                assert_eq!(message.as_deref(), Some("almost"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn reporter_survives_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        ProgressReporter::new("a".to_string(), tx).report(10.0, None);
        ProgressReporter::disabled("b").report(10.0, None);
    }

    #[test]
    fn detached_context_defaults() {
        let ctx = StepContext::detached("solo", json!({"x": 1}));
        assert_eq!(ctx.step(), "solo");
        assert_eq!(ctx.run_id(), Uuid::nil());
        assert_eq!(ctx.input()["x"], json!(1));
        assert!(ctx.state().is_empty());
        assert!(ctx.get("missing").is_none());
        assert!(!ctx.is_cancelled());
        ctx.report_progress(50.0);
    }
}
