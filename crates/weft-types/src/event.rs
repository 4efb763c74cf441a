//! Event types for the weft workflow event bus.
//!
//! `WorkflowEvent` is the unified event type emitted while a run executes.
//! All variants are Clone + Send + Sync for use with tokio channels.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::workflow::RunResult;

/// Events emitted during a workflow run.
///
/// Delivered to run hooks, the broadcast event bus, and the per-run stream.
/// For a single step the order is always started, progress, completed/failed.
/// `RunCompleted` is the last event of every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// The run has started (or resumed).
    RunStarted {
        run_id: Uuid,
        workflow_name: String,
        /// Steps in the initial frontier.
        entry_steps: Vec<String>,
        resumed: bool,
    },

    /// A step's work function is about to run.
    StepStarted {
        run_id: Uuid,
        step: String,
        iteration: u32,
    },

    /// A step reported progress (0-100).
    StepProgress {
        run_id: Uuid,
        step: String,
        percent: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A step finished successfully. On resume, every step restored from
    /// the checkpoint is reported once with `restored` set and its
    /// checkpointed output.
    StepCompleted {
        run_id: Uuid,
        step: String,
        output: Value,
        duration_ms: u64,
        iteration: u32,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        restored: bool,
    },

    /// A step failed; the run stops after this event.
    StepFailed {
        run_id: Uuid,
        step: String,
        error: String,
        iteration: u32,
    },

    /// The run reached a terminal status.
    RunCompleted { result: Box<RunResult> },
}

impl WorkflowEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            WorkflowEvent::RunStarted { run_id, .. }
            | WorkflowEvent::StepStarted { run_id, .. }
            | WorkflowEvent::StepProgress { run_id, .. }
            | WorkflowEvent::StepCompleted { run_id, .. }
            | WorkflowEvent::StepFailed { run_id, .. } => *run_id,
            WorkflowEvent::RunCompleted { result } => result.run_id,
        }
    }

    /// The step this event refers to, if any.
    pub fn step(&self) -> Option<&str> {
        match self {
            WorkflowEvent::StepStarted { step, .. }
            | WorkflowEvent::StepProgress { step, .. }
            | WorkflowEvent::StepCompleted { step, .. }
            | WorkflowEvent::StepFailed { step, .. } => Some(step),
            WorkflowEvent::RunStarted { .. } | WorkflowEvent::RunCompleted { .. } => None,
        }
    }

    /// Whether this is the final event of a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowEvent::RunCompleted { .. })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;
    use crate::workflow::{RunStatus, State};

    #[test]
    fn serializes_with_type_tag() {
        let event = WorkflowEvent::StepProgress {
            run_id: Uuid::nil(),
            step: "fetch".to_string(),
            percent: 40,
            message: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_progress");
        assert_eq!(json["percent"], 40);
        assert!(json.get("message").is_none());
    }

    #[test]
    fn run_completed_is_terminal_and_carries_run_id() {
        let run_id = Uuid::now_v7();
        let event = WorkflowEvent::RunCompleted {
            result: Box::new(RunResult {
                run_id,
                workflow_name: "wf".to_string(),
                status: RunStatus::Completed,
                state: State::new(),
                outputs: BTreeMap::new(),
                completed_steps: BTreeSet::new(),
                iterations: 0,
                duration_ms: 0,
                pending: vec![],
                error: None,
                last_checkpoint: None,
            }),
        };
        assert!(event.is_terminal());
        assert_eq!(event.run_id(), run_id);
        assert_eq!(event.step(), None);
    }

    #[test]
    fn step_events_expose_step_name() {
        let event = WorkflowEvent::StepFailed {
            run_id: Uuid::nil(),
            step: "charge".to_string(),
            error: "declined".to_string(),
            iteration: 2,
        };
        assert_eq!(event.step(), Some("charge"));
        assert!(!event.is_terminal());
    }
}
