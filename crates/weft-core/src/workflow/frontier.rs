//! Frontier runner: concurrent execution of one iteration's steps.
//!
//! Every step of a frontier is spawned onto a `JoinSet` and waits for a
//! permit from the run's semaphore, so at most `max_concurrency` work
//! functions are in flight at once. Tasks report started / progress /
//! finished through a single unbounded channel; because a task's own
//! messages travel the same channel, the run loop always sees them in the
//! order they were produced.
//!
//! There is no retry here. On the first failure the caller detaches the
//! batch: remaining tasks keep running in the background with their
//! cancellation token tripped, and their results are discarded.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::context::StepContext;
use super::step::{BoxStepHandler, StepError, StepResult};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What a step task reports back to the run loop.
#[derive(Debug)]
pub enum FrontierEvent {
    /// The task holds a permit and is about to call the work function.
    Started { step: String },
    /// Progress reported through the step's context.
    Progress {
        step: String,
        percent: u8,
        message: Option<String>,
    },
    /// The work function returned a result.
    Completed {
        step: String,
        result: StepResult,
        duration_ms: u64,
    },
    /// The work function returned an error or panicked.
    Failed {
        step: String,
        error: StepError,
        duration_ms: u64,
    },
}

impl FrontierEvent {
    fn is_final(&self) -> bool {
        matches!(
            self,
            FrontierEvent::Completed { .. } | FrontierEvent::Failed { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// FrontierRunner
// ---------------------------------------------------------------------------

/// A step ready to launch: its handler and fully prepared context.
pub struct StepLaunch {
    pub step: String,
    pub handler: BoxStepHandler,
    pub ctx: StepContext,
}

/// Launches frontier batches under a shared concurrency cap.
///
/// One runner serves one run, so the cap holds across consecutive batches
/// and across tasks left running by a detached batch.
#[derive(Debug, Clone)]
pub struct FrontierRunner {
    permits: Arc<Semaphore>,
    max_concurrency: usize,
}

impl FrontierRunner {
    /// Create a runner; `max_concurrency` is raised to at least 1.
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Event channel for the next batch. Progress reporters of the batch's
    /// contexts must be built from the returned sender.
    pub fn channel() -> (
        mpsc::UnboundedSender<FrontierEvent>,
        mpsc::UnboundedReceiver<FrontierEvent>,
    ) {
        mpsc::unbounded_channel()
    }

    /// Spawn every step in `launches` and return the batch handle.
    ///
    /// `events` must be the sender whose receiver is passed as `receiver`;
    /// the contexts' progress reporters are expected to share it.
    pub fn launch(
        &self,
        launches: Vec<StepLaunch>,
        iteration: u32,
        events: mpsc::UnboundedSender<FrontierEvent>,
        receiver: mpsc::UnboundedReceiver<FrontierEvent>,
        batch_cancel: CancellationToken,
    ) -> FrontierBatch {
        let mut tasks = JoinSet::new();
        let remaining = launches.len();

        for launch in launches {
            let permits = Arc::clone(&self.permits);
            let tx = events.clone();
            let span = tracing::debug_span!("step", step = launch.step.as_str(), iteration);

            tasks.spawn(
                async move {
                    let StepLaunch { step, handler, ctx } = launch;
                    let started = Instant::now();

                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            let _ = tx.send(FrontierEvent::Failed {
                                step,
                                error: StepError::failed("concurrency limiter closed"),
                                duration_ms: 0,
                            });
                            return;
                        }
                    };

                    let _ = tx.send(FrontierEvent::Started { step: step.clone() });
                    tracing::debug!("step started");

                    let outcome = AssertUnwindSafe(handler.run_boxed(ctx)).catch_unwind().await;
                    let duration_ms = started.elapsed().as_millis() as u64;

                    let event = match outcome {
                        Ok(Ok(result)) => {
                            tracing::debug!(duration_ms, "step completed");
                            FrontierEvent::Completed {
                                step,
                                result,
                                duration_ms,
                            }
                        }
                        Ok(Err(error)) => {
                            tracing::debug!(duration_ms, error = %error, "step failed");
                            FrontierEvent::Failed {
                                step,
                                error,
                                duration_ms,
                            }
                        }
                        Err(panic) => FrontierEvent::Failed {
                            step,
                            error: StepError::Panicked(panic_message(panic.as_ref())),
                            duration_ms,
                        },
                    };
                    let _ = tx.send(event);
                }
                .instrument(span),
            );
        }

        FrontierBatch {
            tasks,
            events: receiver,
            remaining,
            cancel: batch_cancel,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// FrontierBatch
// ---------------------------------------------------------------------------

/// Handle to one launched frontier.
pub struct FrontierBatch {
    tasks: JoinSet<()>,
    events: mpsc::UnboundedReceiver<FrontierEvent>,
    remaining: usize,
    cancel: CancellationToken,
}

impl FrontierBatch {
    /// Next event from any step in the batch, or `None` once every step
    /// has reported a final result.
    pub async fn next_event(&mut self) -> Option<FrontierEvent> {
        if self.remaining == 0 {
            return None;
        }
        let event = self.events.recv().await?;
        if event.is_final() {
            self.remaining -= 1;
        }
        Some(event)
    }

    /// Steps that have not reported a final result yet.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Stop waiting for this batch. Unfinished tasks keep running with
    /// their cancellation token tripped; their results are dropped.
    ///
    /// Dropping the batch has the same effect.
    pub fn detach(self) {
        drop(self);
    }
}

impl Drop for FrontierBatch {
    fn drop(&mut self) {
        // A JoinSet aborts its tasks on drop; dispatched work is never
        // force-terminated, only asked to stop.
        if self.remaining > 0 {
            self.cancel.cancel();
        }
        self.tasks.detach_all();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
