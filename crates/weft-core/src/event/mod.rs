//! Run observability: callback hooks and the broadcast event bus.
//!
//! A non-streaming caller observes a run through [`RunHooks`]; the
//! [`EventBus`] is a `RunHooks` implementation that fans every
//! `WorkflowEvent` out to any number of subscribers.

pub mod bus;
pub mod hooks;

pub use bus::EventBus;
pub use hooks::{RunHooks, SharedHooks};
