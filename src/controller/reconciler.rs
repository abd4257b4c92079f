//! # Reconciler
//!
//! Per-kind convergence logic. A reconciler is handed only a key and always
//! re-reads current state; the triggering event's payload is never trusted.

use super::error::ReconcileError;
use crate::store::ObjectKey;
use async_trait::async_trait;

/// Successful pass result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outcome {
    /// Run another pass right away
    pub requeue: bool,
}

impl Outcome {
    #[must_use]
    pub const fn done() -> Self {
        Self { requeue: false }
    }

    #[must_use]
    pub const fn requeue() -> Self {
        Self { requeue: true }
    }
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Controller name, also used as the finalizer marker
    fn name(&self) -> &str;

    /// Drive the object at `key` one step toward its desired state
    async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome, ReconcileError>;
}
