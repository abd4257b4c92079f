//! # Runtime Module
//!
//! Process-level components: initialization, the probe/metrics server, the
//! process supervisor and the reconcile error policy.

pub mod error_policy;
pub mod initialization;
pub mod server;
pub mod supervisor;

pub use error_policy::{error_policy, Action};
pub use initialization::{initialize, InitializationResult};
pub use server::{start_server, track_readiness, ServerState};
pub use supervisor::{ProcessSupervisor, Readiness};
