//! # Controller Module
//!
//! The reconciliation control-loop engine and the controllers built on it.
//!
//! ## Components
//!
//! - [`finalizer`] - finalizer guard that keeps objects until cleanup is confirmed
//! - [`reconciler`] - the per-kind reconcile contract
//! - [`dispatcher`] - watch, generation filter, dedup queue and worker pool
//! - [`manager`] - supervised lifecycle of a set of controllers
//! - [`registry`] - append-only table of controller factories
//! - [`team`] - the Team controller
//!
//! Supporting pieces: [`backoff`], [`clock`], [`restart`] and [`error`].

pub mod backoff;
pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod finalizer;
pub mod manager;
pub mod reconciler;
pub mod registry;
pub mod restart;
pub mod team;

pub use error::{ManagerError, ReconcileError};
pub use manager::{Controller, ControllerManager};
pub use reconciler::{Outcome, Reconciler};
