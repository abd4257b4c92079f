//! # Error Policy
//!
//! Turns a reconcile result into the next scheduling action for its key.
//!
//! - `Ok(requeue)` runs another pass immediately
//! - transient errors retry after per-key exponential backoff
//! - terminal errors are not retried; the next spec change triggers a fresh pass
//!
//! Backoff state is tracked per resource so one failing object does not delay
//! the others.

use crate::controller::backoff::BackoffTracker;
use crate::controller::{Outcome, ReconcileError};
use crate::observability;
use crate::store::ObjectKey;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What the dispatcher does with a key after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Converged; wait for the next watch event or resync
    Await,
    /// Run another pass as soon as a worker is free
    Requeue,
    /// Retry after a delay
    RequeueAfter(Duration),
}

pub fn error_policy(
    controller: &str,
    key: &ObjectKey,
    result: &Result<Outcome, ReconcileError>,
    backoff: &mut BackoffTracker,
) -> Action {
    match result {
        Ok(outcome) => {
            backoff.reset(key);
            if outcome.requeue {
                debug!(controller, resource.name = %key.name, "requeue requested");
                observability::metrics::increment_requeues_total(controller, "requested");
                Action::Requeue
            } else {
                Action::Await
            }
        }
        Err(e) if e.is_terminal() => {
            backoff.reset(key);
            error!(
                controller,
                resource.name = %key.name,
                error = %e,
                "reconcile failed permanently, waiting for a spec change"
            );
            observability::metrics::increment_reconciliation_errors(controller, e.class());
            Action::Await
        }
        Err(e) => {
            let failures = backoff.failures(key);
            let delay = backoff.next_delay(key);
            warn!(
                controller,
                resource.name = %key.name,
                error = %e,
                "reconcile failed"
            );
            info!(
                controller,
                resource.name = %key.name,
                "Retrying in {}ms (error count: {}, trigger source: error-backoff)",
                delay.as_millis(),
                failures + 1
            );
            observability::metrics::increment_reconciliation_errors(controller, e.class());
            observability::metrics::increment_requeues_total(controller, "error-backoff");
            Action::RequeueAfter(delay)
        }
    }
}
