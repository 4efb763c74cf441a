//! Engine logic and storage ports for weft.
//!
//! This crate defines the "ports" (store traits) that the infrastructure
//! layer implements, plus the in-memory implementations. It depends only on
//! `weft-types` -- never on `weft-infra` or any database/IO crate.

pub mod cron;
pub mod event;
pub mod repository;
pub mod scheduler;
pub mod timer;
pub mod workflow;
