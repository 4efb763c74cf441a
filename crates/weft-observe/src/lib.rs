//! Observability setup for weft: tracing subscriber and optional
//! OpenTelemetry export.

pub mod tracing_setup;
