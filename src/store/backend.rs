//! # Store Backend
//!
//! Chooses where objects live: the API server or the in-process store.

use super::{KubeStore, MemoryBackend, ObjectStore, StoredObject};
use k8s_openapi::ClusterResourceScope;
use kube::{Client, Resource};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub enum StoreBackend {
    Kube(Client),
    Memory(MemoryBackend),
}

impl fmt::Debug for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Kube(_) => f.write_str("StoreBackend::Kube"),
            StoreBackend::Memory(memory) => f.debug_tuple("StoreBackend::Memory").field(memory).finish(),
        }
    }
}

impl StoreBackend {
    /// Store handle for a cluster-scoped kind
    pub fn cluster_store<K>(&self) -> Arc<dyn ObjectStore<K>>
    where
        K: StoredObject + Resource<Scope = ClusterResourceScope>,
    {
        match self {
            StoreBackend::Kube(client) => Arc::new(KubeStore::<K>::cluster(client.clone())),
            StoreBackend::Memory(memory) => memory.store::<K>(),
        }
    }
}
