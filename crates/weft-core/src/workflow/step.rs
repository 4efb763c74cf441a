//! Step work functions.
//!
//! A step's work is any [`StepHandler`]: given a [`StepContext`] it produces
//! a [`StepResult`] (output, optional state update, optional explicit next
//! steps) or a [`StepError`]. Closures are adapted with [`FnStep`].
//!
//! `StepHandler` uses RPITIT, so it cannot be a trait object directly. The
//! executor stores handlers as [`BoxStepHandler`], following the usual
//! blanket-impl pattern:
//! 1. Object-safe `StepHandlerDyn` with a boxed future
//! 2. Blanket impl of `StepHandlerDyn` for every `T: StepHandler`
//! 3. `BoxStepHandler = Arc<dyn StepHandlerDyn>`

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use weft_types::workflow::State;

use super::context::StepContext;
use super::definition::Successors;

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// What a step produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepResult {
    /// Output recorded under the step's name and fed to dependent steps.
    pub output: Value,
    /// Partial state update, shallow-merged into the run state.
    pub state_update: Option<State>,
    /// Explicit successors. `Successors::None` defers to the declared
    /// transitions; an empty `Many` ends this branch.
    pub next: Successors,
}

impl StepResult {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }

    /// Replace the partial state update.
    pub fn with_state(mut self, update: State) -> Self {
        self.state_update = Some(update);
        self
    }

    /// Add a single key to the partial state update.
    pub fn with_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.state_update
            .get_or_insert_with(State::new)
            .insert(key.into(), value);
        self
    }

    /// Override the declared transitions with explicit successors.
    pub fn with_next(mut self, next: impl Into<Successors>) -> Self {
        self.next = next.into();
        self
    }

    /// Stop this branch regardless of declared transitions.
    pub fn end(mut self) -> Self {
        self.next = Successors::Many(Vec::new());
        self
    }
}

impl From<Value> for StepResult {
    fn from(output: Value) -> Self {
        Self::new(output)
    }
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors raised by a step's work function.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// The work function reported a failure.
    #[error("{0}")]
    Failed(String),

    /// The work function observed cancellation and stopped.
    #[error("step cancelled")]
    Cancelled,

    /// The work function panicked.
    #[error("step panicked: {0}")]
    Panicked(String),

    /// Any other error bubbled up from a collaborator.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed(message.into())
    }
}

// ---------------------------------------------------------------------------
// StepHandler
// ---------------------------------------------------------------------------

/// A step's unit of work.
///
/// Uses native async fn in traits (RPITIT) like the rest of the crate.
pub trait StepHandler: Send + Sync {
    fn run(
        &self,
        ctx: StepContext,
    ) -> impl Future<Output = Result<StepResult, StepError>> + Send;
}

/// Object-safe version of [`StepHandler`] with a boxed future.
pub trait StepHandlerDyn: Send + Sync {
    fn run_boxed<'a>(
        &'a self,
        ctx: StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<StepResult, StepError>> + Send + 'a>>;
}

impl<T: StepHandler> StepHandlerDyn for T {
    fn run_boxed<'a>(
        &'a self,
        ctx: StepContext,
    ) -> Pin<Box<dyn Future<Output = Result<StepResult, StepError>> + Send + 'a>> {
        Box::pin(self.run(ctx))
    }
}

/// Type-erased, shareable step handler.
pub type BoxStepHandler = Arc<dyn StepHandlerDyn>;

/// Adapts an async closure into a [`StepHandler`].
pub struct FnStep<F> {
    f: F,
}

impl<F> FnStep<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> StepHandler for FnStep<F>
where
    F: Fn(StepContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<StepResult, StepError>> + Send,
{
    fn run(
        &self,
        ctx: StepContext,
    ) -> impl Future<Output = Result<StepResult, StepError>> + Send {
        (self.f)(ctx)
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A named step and its work function.
#[derive(Clone)]
pub struct Step {
    name: String,
    handler: BoxStepHandler,
}

impl Step {
    pub fn new<H: StepHandler + 'static>(name: impl Into<String>, handler: H) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &BoxStepHandler {
        &self.handler
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_result_builders() {
        let result = StepResult::new(json!(1))
            .with_update("count", json!(2))
            .with_update("done", json!(true))
            .with_next("b");

        assert_eq!(result.output, json!(1));
        let update = result.state_update.unwrap();
        assert_eq!(update["count"], json!(2));
        assert_eq!(update["done"], json!(true));
        assert_eq!(result.next, Successors::Single("b".to_string()));
    }

    #[test]
    fn end_produces_empty_successor_list() {
        let result = StepResult::from(json!(null)).end();
        assert_eq!(result.next, Successors::Many(vec![]));
    }

    #[test]
    fn step_error_messages() {
        assert_eq!(StepError::failed("boom").to_string(), "boom");
        assert_eq!(StepError::Cancelled.to_string(), "step cancelled");
        let other: StepError = anyhow::anyhow!("upstream 503").into();
        assert_eq!(other.to_string(), "upstream 503");
    }

    #[tokio::test]
    async fn fn_step_runs_through_dyn_handler() {
        let step = Step::new(
            "double",
            FnStep::new(|ctx: StepContext| async move {
                let n = ctx.input().as_i64().unwrap_or(0);
                Ok(StepResult::new(json!(n * 2)))
            }),
        );
        let ctx = StepContext::detached("double", json!(21));
        let result = step.handler().run_boxed(ctx).await.unwrap();
        assert_eq!(result.output, json!(42));
        assert!(format!("{step:?}").contains("double"));
    }
}
