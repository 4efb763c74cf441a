//! Workflow executor: frontier-by-frontier execution with optional
//! checkpointing, resume and event streaming.
//!
//! # Execution flow
//!
//! 1. Seed the run state from the definition's initial state plus the
//!    caller's overrides (or from a checkpoint on resume).
//! 2. Start with the entry step as the frontier.
//! 3. Each iteration: resolve skipped steps, launch the rest through the
//!    frontier runner, merge every result as it arrives and accumulate the
//!    successors into the next frontier. The successors each step resolved
//!    to are recorded, so a resumed run re-enqueues exactly what the
//!    original run did, explicit `next` overrides included.
//! 4. Stop when the frontier is empty (completed), the iteration ceiling is
//!    reached (iteration-limit-exceeded), the run is cancelled, or a step
//!    fails.
//!
//! The run loop is the only writer of run state; step tasks only ever see a
//! read-only snapshot taken at the start of their iteration.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;
use weft_types::event::WorkflowEvent;
use weft_types::workflow::{
    CheckpointGranularity, ExecutionConfig, RunFailure, RunResult, RunStatus, State, shallow_merge,
};

use crate::event::hooks::SharedHooks;
use crate::repository::checkpoint::CheckpointStore;

use super::checkpoint::{CheckpointError, CheckpointManager, RunSnapshot};
use super::context::{ProgressReporter, StepContext};
use super::definition::{Successors, WorkflowDefinition, WorkflowError};
use super::frontier::{FrontierEvent, FrontierRunner, StepLaunch};
use super::resolver::{assemble_input, next_steps};
use super::step::{StepError, StepResult};

/// Default capacity of the per-run event stream.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// Errors that end a run (or prevent it from starting).
///
/// Variants raised mid-run carry the partial result accumulated before the
/// failure, including sibling results finished earlier in the failing batch.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Checkpoint load for resume, or a checkpoint write that was requested.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// A step's work function failed.
    #[error("step '{step}' failed: {error}")]
    StepFailed {
        step: String,
        #[source]
        error: StepError,
        partial: Box<RunResult>,
    },

    /// A step about to run is not declared in the workflow.
    #[error("step '{step}' is not declared in the workflow")]
    MissingStep { step: String, partial: Box<RunResult> },

    /// Successors of a completed step could not be resolved.
    #[error("resolving successors of '{step}' failed: {error}")]
    Transition {
        step: String,
        #[source]
        error: WorkflowError,
        partial: Box<RunResult>,
    },

    /// Resume was asked to continue a checkpoint of another workflow.
    #[error("checkpoint belongs to workflow '{found}', not '{expected}'")]
    WorkflowMismatch { expected: String, found: String },
}

impl ExecutorError {
    /// State and outputs accumulated before a mid-run failure.
    pub fn partial(&self) -> Option<&RunResult> {
        match self {
            ExecutorError::StepFailed { partial, .. }
            | ExecutorError::MissingStep { partial, .. }
            | ExecutorError::Transition { partial, .. } => Some(partial),
            ExecutorError::Checkpoint(_) | ExecutorError::WorkflowMismatch { .. } => None,
        }
    }

    /// Name of the step the failure is attributed to, if any.
    pub fn step(&self) -> Option<&str> {
        match self {
            ExecutorError::StepFailed { step, .. }
            | ExecutorError::MissingStep { step, .. }
            | ExecutorError::Transition { step, .. } => Some(step),
            ExecutorError::Checkpoint(_) | ExecutorError::WorkflowMismatch { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Runs workflow definitions against a checkpoint store.
///
/// Generic over `S: CheckpointStore` for storage flexibility. Cloning is
/// cheap and clones share the store, hooks and the registry of active runs.
pub struct WorkflowExecutor<S: CheckpointStore> {
    checkpoints: CheckpointManager<S>,
    hooks: Option<SharedHooks>,
    event_buffer: usize,
    /// Cancellation tokens keyed by run_id, for runs in progress.
    active: Arc<DashMap<Uuid, CancellationToken>>,
}

impl<S: CheckpointStore> Clone for WorkflowExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            checkpoints: self.checkpoints.clone(),
            hooks: self.hooks.clone(),
            event_buffer: self.event_buffer,
            active: Arc::clone(&self.active),
        }
    }
}

impl<S: CheckpointStore + 'static> WorkflowExecutor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            checkpoints: CheckpointManager::new(store),
            hooks: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Observe every run of this executor through `hooks`.
    pub fn with_hooks(mut self, hooks: SharedHooks) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Capacity of the bounded channel behind [`stream`](Self::stream).
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn store(&self) -> &S {
        self.checkpoints.store()
    }

    /// Ids of runs currently executing.
    pub fn active_runs(&self) -> Vec<Uuid> {
        self.active.iter().map(|e| *e.key()).collect()
    }

    /// Signal cancellation to a running run. Returns `false` if no run with
    /// this id is active.
    ///
    /// No new frontier is launched afterwards; steps already dispatched are
    /// expected to observe their context's token and stop on their own.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.active.get(&run_id) {
            Some(token) => {
                token.cancel();
                tracing::info!(run_id = %run_id, "run cancellation requested");
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Execute
    // -----------------------------------------------------------------------

    /// Run `workflow` from its entry step.
    ///
    /// `Ok` covers completed, iteration-limit-exceeded and cancelled runs;
    /// step failures and missing steps are `Err` with the partial result.
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        overrides: Option<State>,
        config: ExecutionConfig,
    ) -> Result<RunResult, ExecutorError> {
        self.execute_with_cancel(workflow, overrides, config, CancellationToken::new())
            .await
    }

    /// [`execute`](Self::execute) under a caller-owned cancellation token.
    pub async fn execute_with_cancel(
        &self,
        workflow: &WorkflowDefinition,
        overrides: Option<State>,
        config: ExecutionConfig,
        cancel: CancellationToken,
    ) -> Result<RunResult, ExecutorError> {
        let start = RunStart::fresh(workflow, overrides, &config);
        let emitter = Emitter::new(self.hooks.clone(), None);
        self.drive(workflow, start, config, cancel, emitter).await
    }

    // -----------------------------------------------------------------------
    // Resume
    // -----------------------------------------------------------------------

    /// Continue the run captured by `checkpoint_id`.
    ///
    /// The traversal restarts at the entry step; every step in the
    /// checkpoint's completed-set is skipped and its successors are enqueued
    /// from the checkpointed state. The run keeps its original run id.
    pub async fn resume(
        &self,
        workflow: &WorkflowDefinition,
        checkpoint_id: Uuid,
        config: ExecutionConfig,
    ) -> Result<RunResult, ExecutorError> {
        self.resume_with_cancel(workflow, checkpoint_id, config, CancellationToken::new())
            .await
    }

    pub async fn resume_with_cancel(
        &self,
        workflow: &WorkflowDefinition,
        checkpoint_id: Uuid,
        config: ExecutionConfig,
        cancel: CancellationToken,
    ) -> Result<RunResult, ExecutorError> {
        let start = self.prepare_resume(workflow, checkpoint_id, &config).await?;
        let emitter = Emitter::new(self.hooks.clone(), None);
        self.drive(workflow, start, config, cancel, emitter).await
    }

    async fn prepare_resume(
        &self,
        workflow: &WorkflowDefinition,
        checkpoint_id: Uuid,
        config: &ExecutionConfig,
    ) -> Result<RunStart, ExecutorError> {
        let checkpoint = self.checkpoints.restore(checkpoint_id).await?;
        if checkpoint.workflow_name != workflow.name() {
            return Err(ExecutorError::WorkflowMismatch {
                expected: workflow.name().to_string(),
                found: checkpoint.workflow_name,
            });
        }

        let already_complete = workflow
            .step_names()
            .all(|name| checkpoint.completed_steps.contains(name));
        let mut skip = checkpoint.completed_steps.clone();
        skip.extend(config.skip_steps.iter().cloned());

        tracing::info!(
            run_id = %checkpoint.run_id,
            checkpoint_id = %checkpoint.id,
            completed = checkpoint.completed_steps.len(),
            "resuming from checkpoint"
        );

        let mut run = RunTracker::new(
            checkpoint.run_id,
            checkpoint.workflow_name,
            checkpoint.state,
            checkpoint.outputs,
            checkpoint.completed_steps,
        );
        run.successors = checkpoint.successors;
        run.last_checkpoint = Some(checkpoint.id);

        Ok(RunStart {
            run,
            skip,
            resumed: true,
            already_complete,
        })
    }

    // -----------------------------------------------------------------------
    // Stream
    // -----------------------------------------------------------------------

    /// Run `workflow` in a background task and return its events.
    ///
    /// Events arrive in production order; the last one is always
    /// `RunCompleted`, failures included. The bounded channel applies
    /// backpressure to the run loop, so nothing is dropped. Dropping the
    /// stream does not stop the run.
    pub fn stream(
        &self,
        workflow: Arc<WorkflowDefinition>,
        overrides: Option<State>,
        config: ExecutionConfig,
    ) -> ReceiverStream<WorkflowEvent> {
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let executor = self.clone();

        tokio::spawn(async move {
            let start = RunStart::fresh(&workflow, overrides, &config);
            let emitter = Emitter::new(executor.hooks.clone(), Some(tx));
            let _ = executor
                .drive(&workflow, start, config, CancellationToken::new(), emitter)
                .await;
        });

        ReceiverStream::new(rx)
    }

    /// Streaming variant of [`resume`](Self::resume). A checkpoint that
    /// cannot be resumed yields a single failed `RunCompleted` event.
    pub fn stream_resume(
        &self,
        workflow: Arc<WorkflowDefinition>,
        checkpoint_id: Uuid,
        config: ExecutionConfig,
    ) -> ReceiverStream<WorkflowEvent> {
        let (tx, rx) = mpsc::channel(self.event_buffer);
        let executor = self.clone();

        tokio::spawn(async move {
            let emitter = Emitter::new(executor.hooks.clone(), Some(tx));
            match executor.prepare_resume(&workflow, checkpoint_id, &config).await {
                Ok(start) => {
                    let _ = executor
                        .drive(&workflow, start, config, CancellationToken::new(), emitter)
                        .await;
                }
                Err(e) => {
                    tracing::warn!(checkpoint_id = %checkpoint_id, error = %e, "resume rejected");
                    let result = RunTracker::new(
                        Uuid::now_v7(),
                        workflow.name(),
                        State::new(),
                        BTreeMap::new(),
                        BTreeSet::new(),
                    )
                    .finish(
                        RunStatus::Failed,
                        Some(RunFailure {
                            step: None,
                            message: e.to_string(),
                        }),
                    );
                    emitter
                        .emit(WorkflowEvent::RunCompleted {
                            result: Box::new(result),
                        })
                        .await;
                }
            }
        });

        ReceiverStream::new(rx)
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        workflow: &WorkflowDefinition,
        start: RunStart,
        config: ExecutionConfig,
        cancel: CancellationToken,
        emitter: Emitter,
    ) -> Result<RunResult, ExecutorError> {
        let run_id = start.run.run_id;
        let span = tracing::info_span!("workflow_run", run_id = %run_id, workflow = workflow.name());

        async move {
            let run_token = cancel.child_token();
            let _registration = ActiveRun::register(&self.active, run_id, run_token.clone());
            let RunStart {
                mut run,
                skip,
                resumed,
                already_complete,
            } = start;

            if already_complete {
                emitter
                    .emit(WorkflowEvent::RunStarted {
                        run_id,
                        workflow_name: run.workflow_name.clone(),
                        entry_steps: Vec::new(),
                        resumed,
                    })
                    .await;
                for (step, output) in &run.outputs {
                    emitter.emit(restored_event(run_id, step, output, 0)).await;
                }
                let mut result = run.finish(RunStatus::Completed, None);
                result.duration_ms = 0;
                tracing::info!("checkpoint already covers every step; nothing to run");
                emitter
                    .emit(WorkflowEvent::RunCompleted {
                        result: Box::new(result.clone()),
                    })
                    .await;
                return Ok(result);
            }

            tracing::info!(
                resumed,
                max_concurrency = config.max_concurrency,
                max_iterations = config.max_iterations,
                "run started"
            );
            emitter
                .emit(WorkflowEvent::RunStarted {
                    run_id,
                    workflow_name: run.workflow_name.clone(),
                    entry_steps: vec![workflow.entry().to_string()],
                    resumed,
                })
                .await;

            let outcome = self
                .traverse(workflow, &mut run, &skip, &config, &run_token, &emitter)
                .await;

            match outcome {
                Ok(end) => {
                    let status = match end {
                        RunEnd::Completed => RunStatus::Completed,
                        RunEnd::Cancelled => RunStatus::Cancelled,
                        RunEnd::LimitReached => RunStatus::IterationLimitExceeded,
                    };
                    let result = run.finish(status, None);
                    tracing::info!(
                        status = %result.status,
                        iterations = result.iterations,
                        duration_ms = result.duration_ms,
                        "run finished"
                    );
                    emitter
                        .emit(WorkflowEvent::RunCompleted {
                            result: Box::new(result.clone()),
                        })
                        .await;
                    Ok(result)
                }
                Err(abort) => {
                    let partial = run.finish(RunStatus::Failed, Some(abort.failure()));
                    match &abort {
                        RunAbort::Checkpoint(e) => tracing::error!(error = %e, "run failed"),
                        _ => tracing::warn!(
                            step = partial.error.as_ref().and_then(|f| f.step.as_deref()),
                            duration_ms = partial.duration_ms,
                            "run failed"
                        ),
                    }
                    emitter
                        .emit(WorkflowEvent::RunCompleted {
                            result: Box::new(partial.clone()),
                        })
                        .await;
                    Err(abort.into_error(partial))
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn traverse(
        &self,
        workflow: &WorkflowDefinition,
        run: &mut RunTracker,
        skip: &BTreeSet<String>,
        config: &ExecutionConfig,
        run_token: &CancellationToken,
        emitter: &Emitter,
    ) -> Result<RunEnd, RunAbort> {
        let runner = FrontierRunner::new(config.max_concurrency);
        let mut frontier = vec![workflow.entry().to_string()];

        loop {
            let (runnable, restored) = expand_skipped(workflow, frontier, skip, run)?;
            for step in restored {
                if let Some(output) = run.outputs.get(&step) {
                    emitter
                        .emit(restored_event(run.run_id, &step, output, run.iteration))
                        .await;
                }
            }
            run.pending = runnable.clone();

            if runnable.is_empty() {
                return Ok(RunEnd::Completed);
            }
            if run_token.is_cancelled() {
                return Ok(RunEnd::Cancelled);
            }
            if run.iteration >= config.max_iterations {
                tracing::warn!(
                    max_iterations = config.max_iterations,
                    pending = runnable.len(),
                    "iteration ceiling reached"
                );
                return Ok(RunEnd::LimitReached);
            }
            if let Some(missing) = runnable.iter().find(|name| !workflow.contains_step(name)) {
                return Err(RunAbort::MissingStep(missing.clone()));
            }

            run.iteration += 1;
            tracing::debug!(iteration = run.iteration, steps = runnable.len(), "launching frontier");

            match self
                .run_batch(workflow, run, &runner, runnable, config, run_token, emitter)
                .await?
            {
                BatchEnd::Finished(next) => frontier = next,
                BatchEnd::Cancelled => return Ok(RunEnd::Cancelled),
            }

            if config.checkpoint && config.checkpoint_granularity == CheckpointGranularity::PerIteration {
                self.write_checkpoint(run).await.map_err(RunAbort::Checkpoint)?;
            }
        }
    }

    /// Launch one frontier and fold its results into `run` as they arrive.
    #[allow(clippy::too_many_arguments)]
    async fn run_batch(
        &self,
        workflow: &WorkflowDefinition,
        run: &mut RunTracker,
        runner: &FrontierRunner,
        runnable: Vec<String>,
        config: &ExecutionConfig,
        run_token: &CancellationToken,
        emitter: &Emitter,
    ) -> Result<BatchEnd, RunAbort> {
        let run_id = run.run_id;
        let iteration = run.iteration;
        let workflow_name: Arc<str> = Arc::from(workflow.name());
        let snapshot = Arc::new(run.state.clone());
        let (tx, rx) = FrontierRunner::channel();
        let batch_token = run_token.child_token();

        let mut launches = Vec::with_capacity(runnable.len());
        for name in &runnable {
            let Some(step) = workflow.step(name) else {
                return Err(RunAbort::MissingStep(name.clone()));
            };
            launches.push(StepLaunch {
                step: name.clone(),
                handler: Arc::clone(step.handler()),
                ctx: StepContext::new(
                    run_id,
                    Arc::clone(&workflow_name),
                    name.clone(),
                    iteration,
                    Arc::clone(&snapshot),
                    assemble_input(workflow, name, &run.outputs),
                    batch_token.child_token(),
                    ProgressReporter::new(name.clone(), tx.clone()),
                ),
            });
        }

        let mut batch = runner.launch(launches, iteration, tx, rx, batch_token);
        let mut finished: HashSet<String> = HashSet::new();
        let mut next: Vec<String> = Vec::new();
        let mut queued: HashSet<String> = HashSet::new();

        while let Some(event) = batch.next_event().await {
            match event {
                FrontierEvent::Started { step } => {
                    emitter
                        .emit(WorkflowEvent::StepStarted {
                            run_id,
                            step,
                            iteration,
                        })
                        .await;
                }
                FrontierEvent::Progress {
                    step,
                    percent,
                    message,
                } => {
                    emitter
                        .emit(WorkflowEvent::StepProgress {
                            run_id,
                            step,
                            percent,
                            message,
                        })
                        .await;
                }
                FrontierEvent::Completed {
                    step,
                    result,
                    duration_ms,
                } => {
                    let StepResult {
                        output,
                        state_update,
                        next: explicit,
                    } = result;
                    if let Some(update) = state_update {
                        shallow_merge(&mut run.state, update);
                    }
                    run.completed.insert(step.clone());
                    run.outputs.insert(step.clone(), output.clone());
                    finished.insert(step.clone());

                    let successors = next_steps(workflow, &step, &explicit, &run.state);
                    tracing::debug!(step = step.as_str(), duration_ms, "step completed");
                    emitter
                        .emit(WorkflowEvent::StepCompleted {
                            run_id,
                            step: step.clone(),
                            output,
                            duration_ms,
                            iteration,
                            restored: false,
                        })
                        .await;

                    let successors = match successors {
                        Ok(names) => names,
                        Err(error) => return Err(RunAbort::Transition { step, error }),
                    };
                    run.successors.insert(step, successors.clone());
                    for name in successors {
                        if queued.insert(name.clone()) {
                            next.push(name);
                        }
                    }

                    if config.checkpoint && config.checkpoint_granularity == CheckpointGranularity::PerStep {
                        self.write_checkpoint(run).await.map_err(RunAbort::Checkpoint)?;
                    }
                }
                FrontierEvent::Failed {
                    step,
                    error,
                    duration_ms,
                } => {
                    tracing::debug!(step = step.as_str(), duration_ms, error = %error, "step failed");
                    emitter
                        .emit(WorkflowEvent::StepFailed {
                            run_id,
                            step: step.clone(),
                            error: error.to_string(),
                            iteration,
                        })
                        .await;

                    if matches!(error, StepError::Cancelled) && run_token.is_cancelled() {
                        let mut pending: Vec<String> = runnable
                            .iter()
                            .filter(|name| !finished.contains(*name))
                            .cloned()
                            .collect();
                        for name in next {
                            if !pending.contains(&name) {
                                pending.push(name);
                            }
                        }
                        run.pending = pending;
                        return Ok(BatchEnd::Cancelled);
                    }
                    return Err(RunAbort::Step { step, error });
                }
            }
        }

        run.pending = next.clone();
        Ok(BatchEnd::Finished(next))
    }

    async fn write_checkpoint(&self, run: &mut RunTracker) -> Result<(), CheckpointError> {
        let id = self
            .checkpoints
            .write(RunSnapshot {
                run_id: run.run_id,
                workflow_name: &run.workflow_name,
                state: &run.state,
                completed_steps: &run.completed,
                outputs: &run.outputs,
                successors: &run.successors,
                iteration: run.iteration,
            })
            .await?;
        run.last_checkpoint = Some(id);
        Ok(())
    }
}

/// Remove skipped steps from `frontier`, enqueueing their successors as if
/// they had just completed: the successors recorded when the step ran, or
/// its declared transitions for a step that never ran in this run.
///
/// Returns the steps that must actually run, deduplicated, in discovery
/// order, and the restored steps not yet reported to observers.
fn expand_skipped(
    workflow: &WorkflowDefinition,
    frontier: Vec<String>,
    skip: &BTreeSet<String>,
    run: &mut RunTracker,
) -> Result<(Vec<String>, Vec<String>), RunAbort> {
    let mut runnable = Vec::new();
    let mut restored = Vec::new();
    let mut seen = HashSet::new();
    let mut queue: VecDeque<String> = frontier.into();

    while let Some(name) = queue.pop_front() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if !skip.contains(&name) {
            runnable.push(name);
            continue;
        }

        tracing::debug!(step = name.as_str(), "skipping completed step");
        run.completed.insert(name.clone());
        if run.outputs.contains_key(&name) && run.reported.insert(name.clone()) {
            restored.push(name.clone());
        }

        let successors = match run.successors.get(&name) {
            Some(recorded) => recorded.clone(),
            None => match next_steps(workflow, &name, &Successors::None, &run.state) {
                Ok(declared) => {
                    run.successors.insert(name.clone(), declared.clone());
                    declared
                }
                Err(error) => return Err(RunAbort::Transition { step: name, error }),
            },
        };
        queue.extend(successors);
    }

    Ok((runnable, restored))
}

/// `StepCompleted` for a step whose output was restored from a checkpoint.
fn restored_event(run_id: Uuid, step: &str, output: &Value, iteration: u32) -> WorkflowEvent {
    WorkflowEvent::StepCompleted {
        run_id,
        step: step.to_string(),
        output: output.clone(),
        duration_ms: 0,
        iteration,
        restored: true,
    }
}

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

struct RunStart {
    run: RunTracker,
    skip: BTreeSet<String>,
    resumed: bool,
    already_complete: bool,
}

impl RunStart {
    fn fresh(workflow: &WorkflowDefinition, overrides: Option<State>, config: &ExecutionConfig) -> Self {
        let mut state = workflow.initial_state().clone();
        if let Some(overrides) = overrides {
            shallow_merge(&mut state, overrides);
        }
        Self {
            run: RunTracker::new(
                Uuid::now_v7(),
                workflow.name(),
                state,
                BTreeMap::new(),
                BTreeSet::new(),
            ),
            skip: config.skip_steps.clone(),
            resumed: false,
            already_complete: false,
        }
    }
}

/// Mutable state of one run, owned by its run loop.
struct RunTracker {
    run_id: Uuid,
    workflow_name: String,
    state: State,
    outputs: BTreeMap<String, Value>,
    completed: BTreeSet<String>,
    successors: BTreeMap<String, Vec<String>>,
    /// Restored steps already announced with a `StepCompleted` event.
    reported: HashSet<String>,
    iteration: u32,
    pending: Vec<String>,
    last_checkpoint: Option<Uuid>,
    started: Instant,
}

impl RunTracker {
    fn new(
        run_id: Uuid,
        workflow_name: impl Into<String>,
        state: State,
        outputs: BTreeMap<String, Value>,
        completed: BTreeSet<String>,
    ) -> Self {
        Self {
            run_id,
            workflow_name: workflow_name.into(),
            state,
            outputs,
            completed,
            successors: BTreeMap::new(),
            reported: HashSet::new(),
            iteration: 0,
            pending: Vec::new(),
            last_checkpoint: None,
            started: Instant::now(),
        }
    }

    fn finish(self, status: RunStatus, error: Option<RunFailure>) -> RunResult {
        let pending = match status {
            RunStatus::Completed => Vec::new(),
            _ => self.pending,
        };
        RunResult {
            run_id: self.run_id,
            workflow_name: self.workflow_name,
            status,
            state: self.state,
            outputs: self.outputs,
            completed_steps: self.completed,
            iterations: self.iteration,
            duration_ms: self.started.elapsed().as_millis() as u64,
            pending,
            error,
            last_checkpoint: self.last_checkpoint,
        }
    }
}

enum RunEnd {
    Completed,
    Cancelled,
    LimitReached,
}

enum BatchEnd {
    Finished(Vec<String>),
    Cancelled,
}

enum RunAbort {
    Step { step: String, error: StepError },
    MissingStep(String),
    Transition { step: String, error: WorkflowError },
    Checkpoint(CheckpointError),
}

impl RunAbort {
    fn failure(&self) -> RunFailure {
        match self {
            RunAbort::Step { step, error } => RunFailure {
                step: Some(step.clone()),
                message: error.to_string(),
            },
            RunAbort::MissingStep(step) => RunFailure {
                step: Some(step.clone()),
                message: format!("step '{step}' is not declared in the workflow"),
            },
            RunAbort::Transition { step, error } => RunFailure {
                step: Some(step.clone()),
                message: error.to_string(),
            },
            RunAbort::Checkpoint(e) => RunFailure {
                step: None,
                message: e.to_string(),
            },
        }
    }

    fn into_error(self, partial: RunResult) -> ExecutorError {
        let partial = Box::new(partial);
        match self {
            RunAbort::Step { step, error } => ExecutorError::StepFailed {
                step,
                error,
                partial,
            },
            RunAbort::MissingStep(step) => ExecutorError::MissingStep { step, partial },
            RunAbort::Transition { step, error } => ExecutorError::Transition {
                step,
                error,
                partial,
            },
            RunAbort::Checkpoint(e) => ExecutorError::Checkpoint(e),
        }
    }
}

/// Registration of a run's token in the executor's active-run map, removed
/// when the run loop exits.
struct ActiveRun<'a> {
    runs: &'a DashMap<Uuid, CancellationToken>,
    run_id: Uuid,
}

impl<'a> ActiveRun<'a> {
    fn register(runs: &'a DashMap<Uuid, CancellationToken>, run_id: Uuid, token: CancellationToken) -> Self {
        runs.insert(run_id, token);
        Self { runs, run_id }
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.runs.remove(&self.run_id);
    }
}

/// Delivers run events to the hooks and, for streamed runs, the channel.
struct Emitter {
    hooks: Option<SharedHooks>,
    stream: Option<mpsc::Sender<WorkflowEvent>>,
}

impl Emitter {
    fn new(hooks: Option<SharedHooks>, stream: Option<mpsc::Sender<WorkflowEvent>>) -> Self {
        Self { hooks, stream }
    }

    async fn emit(&self, event: WorkflowEvent) {
        if let Some(hooks) = &self.hooks {
            hooks.on_event(&event);
        }
        if let Some(stream) = &self.stream {
            // A dropped stream does not stop the run.
            let _ = stream.send(event).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
