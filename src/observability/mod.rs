//! # Observability
//!
//! Prometheus metrics for the control loops. Logging goes through `tracing`
//! and is configured in [`crate::runtime::initialization`].

pub mod metrics;
