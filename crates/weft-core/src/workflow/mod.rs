//! Workflow engine core: step graphs, frontier execution and durable checkpointing.
//!
//! - `definition` -- steps, transitions, the validating builder
//! - `graph` -- petgraph model of the static topology for diagnostics
//! - `expression` -- JEXL evaluator for transition conditions
//! - `resolver` -- successor resolution and input assembly
//! - `step` / `context` -- the work-function contract and its context
//! - `frontier` -- bounded-concurrency execution of one iteration
//! - `checkpoint` -- checkpoint manager over a `CheckpointStore`
//! - `executor` -- run loop: execute, resume, stream, cancel

pub mod checkpoint;
pub mod context;
pub mod definition;
pub mod executor;
pub mod expression;
pub mod frontier;
pub mod graph;
pub mod resolver;
pub mod step;

pub use checkpoint::{CheckpointError, CheckpointManager};
pub use context::StepContext;
pub use definition::{Condition, Successors, WorkflowBuilder, WorkflowDefinition, WorkflowError};
pub use executor::{ExecutorError, WorkflowExecutor};
pub use step::{FnStep, Step, StepError, StepHandler, StepResult};
