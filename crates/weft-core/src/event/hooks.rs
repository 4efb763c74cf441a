//! Callback hooks invoked by the executor as a run progresses.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;
use weft_types::event::WorkflowEvent;
use weft_types::workflow::RunResult;

/// Observer of run lifecycle events. Every callback defaults to a no-op.
///
/// Hooks are called from the run loop, in event order, so they must not
/// block. Expensive work belongs on the other side of a channel.
pub trait RunHooks: Send + Sync {
    fn on_run_started(&self, _run_id: Uuid, _workflow: &str, _resumed: bool) {}

    fn on_step_started(&self, _run_id: Uuid, _step: &str, _iteration: u32) {}

    fn on_step_progress(&self, _run_id: Uuid, _step: &str, _percent: u8, _message: Option<&str>) {}

    fn on_step_completed(&self, _run_id: Uuid, _step: &str, _output: &Value, _duration_ms: u64) {}

    fn on_step_error(&self, _run_id: Uuid, _step: &str, _error: &str) {}

    fn on_run_finished(&self, _result: &RunResult) {}

    /// Dispatch a full event. Implementors that want the raw event (like
    /// the event bus) override this instead of the individual callbacks.
    fn on_event(&self, event: &WorkflowEvent) {
        match event {
            WorkflowEvent::RunStarted {
                run_id,
                workflow_name,
                resumed,
                ..
            } => self.on_run_started(*run_id, workflow_name, *resumed),
            WorkflowEvent::StepStarted {
                run_id,
                step,
                iteration,
            } => self.on_step_started(*run_id, step, *iteration),
            WorkflowEvent::StepProgress {
                run_id,
                step,
                percent,
                message,
            } => self.on_step_progress(*run_id, step, *percent, message.as_deref()),
            WorkflowEvent::StepCompleted {
                run_id,
                step,
                output,
                duration_ms,
                ..
            } => self.on_step_completed(*run_id, step, output, *duration_ms),
            WorkflowEvent::StepFailed {
                run_id, step, error, ..
            } => self.on_step_error(*run_id, step, error),
            WorkflowEvent::RunCompleted { result } => self.on_run_finished(result),
        }
    }
}

/// Hooks shared between the executor and its caller.
pub type SharedHooks = Arc<dyn RunHooks>;
