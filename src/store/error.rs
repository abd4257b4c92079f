//! # Store Errors
//!
//! Failures surfaced by the object store, classified so the dispatcher can tell
//! a retryable hiccup from a request that will never succeed as written.

use super::ObjectKey;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(ObjectKey),

    #[error("{0} already exists")]
    AlreadyExists(ObjectKey),

    /// Optimistic concurrency check failed; re-read and try again
    #[error("conflict writing {key}: {message}")]
    Conflict { key: ObjectKey, message: String },

    #[error("store call '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("watch stream failed: {0}")]
    Watch(String),

    /// The request itself is malformed
    #[error("invalid object {key}: {message}")]
    Invalid { key: ObjectKey, message: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),
}

impl StoreError {
    /// Map a client error onto the store taxonomy using the API status code
    pub fn from_kube(error: kube::Error, key: &ObjectKey) -> Self {
        if let kube::Error::Api(response) = &error {
            let mapped = match response.code {
                404 => Some(StoreError::NotFound(key.clone())),
                409 if response.reason == "AlreadyExists" => {
                    Some(StoreError::AlreadyExists(key.clone()))
                }
                409 => Some(StoreError::Conflict {
                    key: key.clone(),
                    message: response.message.clone(),
                }),
                400 | 422 => Some(StoreError::Invalid {
                    key: key.clone(),
                    message: response.message.clone(),
                }),
                429 | 500..=599 => Some(StoreError::Unavailable(response.message.clone())),
                _ => None,
            };
            if let Some(mapped) = mapped {
                return mapped;
            }
        }
        StoreError::Kube(error)
    }

    /// The server refused the request as written; repeating it cannot succeed
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        matches!(self, StoreError::Invalid { .. })
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
