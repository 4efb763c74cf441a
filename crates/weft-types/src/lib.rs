//! Shared domain types for weft.
//!
//! This crate contains the serializable types exchanged between the engine,
//! its storage adapters and its observers: run results, checkpoints, timer
//! records, queue items, workflow events and engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod queue;
pub mod timer;
pub mod workflow;
