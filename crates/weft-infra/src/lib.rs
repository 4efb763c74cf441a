//! Infrastructure layer for weft.
//!
//! Implements the store traits defined in `weft-core`: SQLite checkpoint and
//! timer stores, an atomic JSON-file checkpoint store, plus configuration
//! loading and data directory resolution.

pub mod config;
pub mod filesystem;
pub mod sqlite;
