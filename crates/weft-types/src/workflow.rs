//! Run-level domain types for weft.
//!
//! Defines the data snapshot that flows through a run (`State`), the per-run
//! execution options (`ExecutionConfig`), the terminal report of a run
//! (`RunResult`) and the persisted resume point (`Checkpoint`).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// The mutable data snapshot of a run: a JSON object keyed by field name.
pub type State = Map<String, Value>;

/// Shallow-merge `update` into `state`: top-level keys in `update` replace
/// the corresponding keys in `state`, nested objects are not merged.
pub fn shallow_merge(state: &mut State, update: State) {
    for (key, value) in update {
        state.insert(key, value);
    }
}

// ---------------------------------------------------------------------------
// Run status
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    IterationLimitExceeded,
    Cancelled,
}

impl RunStatus {
    /// Whether the run has reached a final state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::IterationLimitExceeded => "iteration_limit_exceeded",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Execution configuration
// ---------------------------------------------------------------------------

/// When the executor writes checkpoints during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointGranularity {
    /// After every completed step.
    PerStep,
    /// Once after every frontier iteration.
    #[default]
    PerIteration,
}

/// Default maximum number of step work functions in flight at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Default iteration ceiling for a single run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// Per-run execution options accepted by the run submission surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum number of step work functions in flight at once (minimum 1).
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Maximum number of frontier iterations before the run stops.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Whether checkpoints are written during the run.
    #[serde(default)]
    pub checkpoint: bool,
    /// When checkpoints are written (if enabled).
    #[serde(default)]
    pub checkpoint_granularity: CheckpointGranularity,
    /// Step names treated as already done (used by resume).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub skip_steps: BTreeSet<String>,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            checkpoint: false,
            checkpoint_granularity: CheckpointGranularity::default(),
            skip_steps: BTreeSet::new(),
        }
    }
}

impl ExecutionConfig {
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Enable checkpointing with the given granularity.
    pub fn with_checkpoints(mut self, granularity: CheckpointGranularity) -> Self {
        self.checkpoint = true;
        self.checkpoint_granularity = granularity;
        self
    }

    pub fn with_skip_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_steps = steps.into_iter().map(Into::into).collect();
        self
    }
}

// ---------------------------------------------------------------------------
// Run result
// ---------------------------------------------------------------------------

/// Why a run failed: the offending step (when one is to blame) and the cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// Name of the step that failed or was missing. `None` for store failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Human-readable cause.
    pub message: String,
}

/// Terminal report of a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Run identifier (preserved across resume).
    pub run_id: Uuid,
    /// Name of the workflow definition that was executed.
    pub workflow_name: String,
    /// Final status.
    pub status: RunStatus,
    /// Final run state after all merges.
    pub state: State,
    /// Output of every completed step, keyed by step name.
    pub outputs: BTreeMap<String, Value>,
    /// Names of every step that completed in this run.
    pub completed_steps: BTreeSet<String>,
    /// Number of frontier iterations performed.
    pub iterations: u32,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
    /// Steps still queued when the run stopped (iteration ceiling or cancellation).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<String>,
    /// Failure details when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunFailure>,
    /// Id of the most recent checkpoint written for this run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint: Option<Uuid>,
}

impl RunResult {
    /// Whether the run completed successfully.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Every output key must belong to the completed-set.
    pub fn is_consistent(&self) -> bool {
        self.outputs.keys().all(|k| self.completed_steps.contains(k))
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Immutable, timestamped snapshot of a run sufficient to resume it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// UUIDv7 checkpoint id (time-sortable).
    pub id: Uuid,
    /// The run this checkpoint belongs to.
    pub run_id: Uuid,
    /// Name of the workflow definition.
    pub workflow_name: String,
    /// Run state at checkpoint time.
    pub state: State,
    /// Steps completed at checkpoint time.
    pub completed_steps: BTreeSet<String>,
    /// Output of every completed step.
    pub outputs: BTreeMap<String, Value>,
    /// Successors each completed step resolved to when it ran, explicit
    /// `next` overrides included. Resume re-enqueues exactly these.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub successors: BTreeMap<String, Vec<String>>,
    /// Iteration counter at checkpoint time.
    pub iteration: u32,
    /// When the checkpoint was created.
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a new checkpoint with a fresh id and the current timestamp.
    pub fn new(
        run_id: Uuid,
        workflow_name: impl Into<String>,
        state: State,
        completed_steps: BTreeSet<String>,
        outputs: BTreeMap<String, Value>,
        iteration: u32,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            run_id,
            workflow_name: workflow_name.into(),
            state,
            completed_steps,
            outputs,
            successors: BTreeMap::new(),
            iteration,
            created_at: Utc::now(),
        }
    }

    /// Attach the successors each completed step resolved to.
    pub fn with_successors(mut self, successors: BTreeMap<String, Vec<String>>) -> Self {
        self.successors = successors;
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> State {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn shallow_merge_replaces_top_level_keys_only() {
        let mut state = obj(json!({"a": 1, "nested": {"x": 1, "y": 2}}));
        shallow_merge(&mut state, obj(json!({"b": 2, "nested": {"x": 9}})));

        assert_eq!(state["a"], json!(1));
        assert_eq!(state["b"], json!(2));
        assert_eq!(state["nested"], json!({"x": 9}));
    }

    #[test]
    fn run_status_terminal() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::IterationLimitExceeded.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn run_status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::IterationLimitExceeded).unwrap();
        assert_eq!(json, "\"iteration_limit_exceeded\"");
        assert_eq!(RunStatus::IterationLimitExceeded.to_string(), "iteration_limit_exceeded");
    }

    #[test]
    fn execution_config_defaults_from_empty_json() {
        let config: ExecutionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert!(!config.checkpoint);
        assert_eq!(config.checkpoint_granularity, CheckpointGranularity::PerIteration);
        assert!(config.skip_steps.is_empty());
    }

    #[test]
    fn execution_config_builders() {
        let config = ExecutionConfig::default()
            .with_max_concurrency(3)
            .with_max_iterations(7)
            .with_checkpoints(CheckpointGranularity::PerStep)
            .with_skip_steps(["a", "b"]);
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.max_iterations, 7);
        assert!(config.checkpoint);
        assert_eq!(config.checkpoint_granularity, CheckpointGranularity::PerStep);
        assert!(config.skip_steps.contains("a"));
    }

    #[test]
    fn run_result_consistency() {
        let mut result = RunResult {
            run_id: Uuid::nil(),
            workflow_name: "wf".to_string(),
            status: RunStatus::Completed,
            state: State::new(),
            outputs: BTreeMap::from([("a".to_string(), json!(1))]),
            completed_steps: BTreeSet::from(["a".to_string()]),
            iterations: 1,
            duration_ms: 0,
            pending: vec![],
            error: None,
            last_checkpoint: None,
        };
        assert!(result.is_success());
        assert!(result.is_consistent());

        result.outputs.insert("ghost".to_string(), json!(null));
        assert!(!result.is_consistent());
    }

    #[test]
    fn checkpoint_new_assigns_fresh_ids() {
        let run_id = Uuid::now_v7();
        let a = Checkpoint::new(run_id, "wf", State::new(), BTreeSet::new(), BTreeMap::new(), 0);
        let b = Checkpoint::new(run_id, "wf", State::new(), BTreeSet::new(), BTreeMap::new(), 0);
        assert_ne!(a.id, b.id);
        assert_eq!(a.run_id, b.run_id);
    }

    #[test]
    fn checkpoint_successors_default_to_empty() {
        let cp = Checkpoint::new(Uuid::now_v7(), "wf", State::new(), BTreeSet::new(), BTreeMap::new(), 1)
            .with_successors(BTreeMap::from([("a".to_string(), vec!["c".to_string()])]));
        let mut json = serde_json::to_value(&cp).unwrap();
        assert_eq!(json["successors"]["a"], json!(["c"]));

        json.as_object_mut().unwrap().remove("successors");
        let older: Checkpoint = serde_json::from_value(json).unwrap();
        assert!(older.successors.is_empty());
    }
}
