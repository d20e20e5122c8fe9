//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing with an environment-driven filter
//! - OpenTelemetry metrics for archive writes and aggregate refreshes

pub mod metrics;
pub mod tracing;
