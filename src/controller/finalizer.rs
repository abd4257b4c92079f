//! # Finalizer Guard
//!
//! Keeps an object in the store until its owning controller has torn down
//! everything it created for it.
//!
//! The marker is added before the first externally visible side effect and
//! removed only after teardown is confirmed. Removing the last marker lets the
//! store delete the object.

use crate::store::{StoreError, StoredObject, WriteResource};
use kube::{Resource, ResourceExt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizerGuard {
    name: String,
}

impl FinalizerGuard {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn has_marker<K: Resource>(&self, obj: &K) -> bool {
        obj.finalizers().iter().any(|f| *f == self.name)
    }

    /// Deletion requested and this controller still holds the object
    pub fn is_deletion_candidate<K: Resource>(&self, obj: &K) -> bool {
        obj.meta().deletion_timestamp.is_some() && self.has_marker(obj)
    }

    /// Live object not yet carrying this controller's marker
    pub fn need_to_add<K: Resource>(&self, obj: &K) -> bool {
        obj.meta().deletion_timestamp.is_none() && !self.has_marker(obj)
    }

    /// Append the marker and persist. No write if it is already present.
    ///
    /// # Errors
    ///
    /// Returns the store error, typically a conflict the caller retries by re-reading.
    pub async fn add<K, S>(&self, store: &S, obj: &K) -> Result<K, StoreError>
    where
        K: StoredObject,
        S: WriteResource<K> + ?Sized,
    {
        if self.has_marker(obj) {
            return Ok(obj.clone());
        }
        let mut next = obj.clone();
        next.finalizers_mut().push(self.name.clone());
        store.update(&next).await
    }

    /// Drop the marker and persist. No write if it is already absent.
    ///
    /// # Errors
    ///
    /// Returns the store error; the marker stays in place.
    pub async fn remove<K, S>(&self, store: &S, obj: &K) -> Result<K, StoreError>
    where
        K: StoredObject,
        S: WriteResource<K> + ?Sized,
    {
        if !self.has_marker(obj) {
            return Ok(obj.clone());
        }
        let mut next = obj.clone();
        next.finalizers_mut().retain(|f| *f != self.name);
        store.update(&next).await
    }
}
