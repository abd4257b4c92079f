//! # Kubernetes Store
//!
//! [`ObjectStore`](super::ObjectStore) backed by the API server. Reads and
//! writes go through `kube::Api`, the change feed through `kube_runtime::watcher`.

use super::{
    ObjectKey, ReadResource, StoreError, StoredObject, WatchEvent, WatchResource, WriteResource,
    WriteStatus,
};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::ClusterResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use kube_runtime::watcher;
use serde_json::json;
use std::fmt;
use std::marker::PhantomData;
use tracing::debug;

/// Server-side watch timeout. Kept under the API server's own limit so the
/// watcher reconnects on its own schedule instead of being cut off.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// API-server store for cluster-scoped kind `K`
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> fmt::Debug for KubeStore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl<K> KubeStore<K>
where
    K: StoredObject + Resource<Scope = ClusterResourceScope>,
{
    #[must_use]
    pub fn cluster(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K: StoredObject> KubeStore<K> {
    fn all(&self) -> Api<K> {
        Api::all(self.client.clone())
    }
}

fn name_of(key: &ObjectKey) -> &str {
    key.name.as_str()
}

#[async_trait]
impl<K: StoredObject> ReadResource<K> for KubeStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        self.all()
            .get_opt(name_of(key))
            .await
            .map_err(|e| StoreError::from_kube(e, key))
    }
}

#[async_trait]
impl<K: StoredObject> WriteResource<K> for KubeStore<K> {
    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::for_object(obj);
        self.all()
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| StoreError::from_kube(e, &key))
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::for_object(obj);
        self.all()
            .replace(name_of(&key), &PostParams::default(), obj)
            .await
            .map_err(|e| StoreError::from_kube(e, &key))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        match self
            .all()
            .delete(name_of(key), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!(key = %key, "object already gone");
                Ok(())
            }
            Err(e) => Err(StoreError::from_kube(e, key)),
        }
    }
}

#[async_trait]
impl<K: StoredObject> WriteStatus<K> for KubeStore<K> {
    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::for_object(obj);
        let value = serde_json::to_value(obj).map_err(|e| StoreError::Invalid {
            key: key.clone(),
            message: e.to_string(),
        })?;
        // resourceVersion in the patch body makes the server reject stale writes.
        let patch = json!({
            "metadata": { "resourceVersion": obj.meta().resource_version },
            "status": value.get("status").cloned().unwrap_or_default(),
        });
        self.all()
            .patch_status(name_of(&key), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, &key))
    }
}

#[async_trait]
impl<K: StoredObject> WatchResource<K> for KubeStore<K> {
    async fn list(&self) -> Result<Vec<K>, StoreError> {
        let key = ObjectKey::new(K::kind(&()), None, "");
        self.all()
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| StoreError::from_kube(e, &key))
    }

    async fn watch(
        &self,
    ) -> Result<BoxStream<'static, Result<WatchEvent<K>, StoreError>>, StoreError> {
        let config = watcher::Config::default().timeout(WATCH_TIMEOUT_SECS);
        let events = watcher(self.all(), config).filter_map(|event| async move {
            match event {
                Ok(watcher::Event::Apply(obj) | watcher::Event::InitApply(obj)) => {
                    Some(Ok(WatchEvent::Applied(obj)))
                }
                Ok(watcher::Event::Delete(obj)) => Some(Ok(WatchEvent::Deleted(obj))),
                Ok(watcher::Event::Init | watcher::Event::InitDone) => None,
                Err(e) => Some(Err(StoreError::Watch(e.to_string()))),
            }
        });
        Ok(events.boxed())
    }
}
