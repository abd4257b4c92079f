//! # Object Store
//!
//! The watchable object store the control loop runs on, expressed as narrow
//! capability traits so each reconciler asks only for what it uses.
//!
//! ## Implementations
//!
//! - [`KubeStore`] - backed by the Kubernetes API server (`kube::Api` + `kube_runtime::watcher`)
//! - [`MemoryStore`] - in-process store with the same semantics, used by tests and local runs
//!
//! Both enforce optimistic concurrency on `resourceVersion`, bump `generation`
//! only when the spec changes, and keep objects with finalizers around after a
//! delete request until the last finalizer is removed.

mod backend;
mod error;
mod kube_store;
mod memory;

pub use backend::StoreBackend;
pub use error::StoreError;
pub use kube_store::KubeStore;
pub use memory::{Fault, MemoryBackend, MemoryStore, StoreOperation};

use async_trait::async_trait;
use futures::stream::BoxStream;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// Bounds every object handled by a store must satisfy
pub trait StoredObject:
    Resource<DynamicType = ()> + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> StoredObject for K where
    K: Resource<DynamicType = ()> + Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Unique identity of a managed object: kind, optional namespace, name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: impl Into<String>, namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
            name: name.into(),
        }
    }

    /// Key for an object of kind `K`
    pub fn of<K: Resource<DynamicType = ()>>(namespace: Option<&str>, name: impl Into<String>) -> Self {
        Self::new(K::kind(&()), namespace, name)
    }

    /// Key of an existing object
    pub fn for_object<K: Resource<DynamicType = ()>>(obj: &K) -> Self {
        let meta = obj.meta();
        Self::new(
            K::kind(&()),
            meta.namespace.as_deref(),
            meta.name.clone().unwrap_or_default(),
        )
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.kind, ns, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// A change observed on the watch feed
#[derive(Debug, Clone)]
pub enum WatchEvent<K> {
    /// Object was created or modified (including deletion requests held by finalizers)
    Applied(K),
    /// Object was physically removed from the store
    Deleted(K),
}

/// Point reads
#[async_trait]
pub trait ReadResource<K>: Send + Sync {
    /// Fetch an object; `Ok(None)` when it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>;
}

/// Spec and metadata writes
#[async_trait]
pub trait WriteResource<K>: Send + Sync {
    /// Persist a new object; fails with [`StoreError::AlreadyExists`] if the key is taken
    async fn create(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace spec and metadata; fails with [`StoreError::Conflict`] on a stale `resourceVersion`.
    /// Any status carried by `obj` is ignored.
    async fn update(&self, obj: &K) -> Result<K, StoreError>;

    /// Request deletion. Succeeds if the object is already gone.
    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;
}

/// Status subresource writes, kept apart from spec writes
#[async_trait]
pub trait WriteStatus<K>: Send + Sync {
    /// Replace the status; fails with [`StoreError::Conflict`] on a stale `resourceVersion`.
    /// Any spec or metadata change carried by `obj` is ignored.
    async fn update_status(&self, obj: &K) -> Result<K, StoreError>;
}

/// List and watch for one kind across all namespaces
#[async_trait]
pub trait WatchResource<K>: Send + Sync {
    async fn list(&self) -> Result<Vec<K>, StoreError>;

    /// Open a change feed. The stream ends or yields an error when the
    /// underlying connection drops; callers re-open it.
    async fn watch(&self) -> Result<BoxStream<'static, Result<WatchEvent<K>, StoreError>>, StoreError>;
}

/// Every capability at once
pub trait ObjectStore<K>: ReadResource<K> + WriteResource<K> + WriteStatus<K> + WatchResource<K> {}

impl<K, T> ObjectStore<K> for T where
    T: ReadResource<K> + WriteResource<K> + WriteStatus<K> + WatchResource<K> + ?Sized
{
}
