//! # Controller Errors

use crate::store::{ObjectKey, StoreError};
use std::time::Duration;
use thiserror::Error;

/// Why a reconcile pass did not converge
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The desired state can never be applied as written. Not retried.
    #[error("invalid {key}: {reason}")]
    InvalidSpec { key: ObjectKey, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Dependent resources could not be confirmed torn down
    #[error("cleanup of {key} incomplete: {source}")]
    Cleanup {
        key: ObjectKey,
        #[source]
        source: StoreError,
    },

    /// The reconciler panicked mid-pass. Retried with backoff.
    #[error("reconcile of {key} panicked: {message}")]
    Panicked { key: ObjectKey, message: String },
}

impl ReconcileError {
    /// Terminal errors are fixed by editing the spec, not by retrying
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            ReconcileError::InvalidSpec { .. } => true,
            ReconcileError::Store(e) => e.is_invalid(),
            ReconcileError::Cleanup { .. } | ReconcileError::Panicked { .. } => false,
        }
    }

    /// Label for error metrics
    #[must_use]
    pub fn class(&self) -> &'static str {
        if self.is_terminal() {
            "terminal"
        } else {
            "transient"
        }
    }
}

/// Lifecycle failures of controllers, managers and the registry
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("controller '{0}' is already registered")]
    DuplicateController(String),

    #[error("failed to build controller '{name}': {reason}")]
    Build { name: String, reason: String },

    #[error("watch for controller '{controller}' failed: {source}")]
    Watch {
        controller: String,
        #[source]
        source: StoreError,
    },

    #[error("watch for controller '{0}' closed")]
    WatchClosed(String),

    #[error("initial list for controller '{controller}' failed: {source}")]
    List {
        controller: String,
        #[source]
        source: StoreError,
    },

    #[error("controller manager '{name}' did not start within {timeout:?}")]
    StartupTimeout { name: String, timeout: Duration },

    #[error("controller manager '{name}' did not stop within {timeout:?}")]
    ShutdownTimeout { name: String, timeout: Duration },

    #[error("controller manager '{0}' stopped before it became ready")]
    Stopped(String),
}
