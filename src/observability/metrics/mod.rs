//! # Metrics Module
//!
//! Prometheus metrics for monitoring the controllers, organized by responsibility.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup, registration and text exposition
//! - `controller_metrics` - Control-loop metrics (reconciliations, errors, requeues, restarts, queue depth)

pub mod controller_metrics;
pub mod registry;

pub use controller_metrics::*;
pub use registry::*;
