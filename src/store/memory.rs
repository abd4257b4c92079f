//! # In-Memory Store
//!
//! An in-process object store with API-server semantics:
//!
//! - `resourceVersion` is bumped on every write and checked on update paths
//! - `generation` starts at 1 and is bumped only when the spec changes
//! - status and spec are written through separate paths
//! - delete requests on objects with finalizers only set `deletionTimestamp`;
//!   the object is removed when its last finalizer goes away
//!
//! Faults can be injected per operation with [`MemoryStore::fail_next`], and
//! open watches can be cut with [`MemoryStore::disconnect_watchers`].

use super::{
    ObjectKey, ReadResource, StoreError, StoredObject, WatchEvent, WatchResource, WriteResource,
    WriteStatus,
};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

const WATCH_BUFFER: usize = 1024;

/// Store calls that can be counted and faulted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Get,
    List,
    Watch,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

/// Failure injected into the next matching call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Behaves like a stale `resourceVersion`
    Conflict,
    /// Behaves like an unreachable API server
    Unavailable,
    /// Behaves like an admission webhook or quota refusing the request
    Rejected,
}

#[derive(Debug, Clone)]
enum Feed<K> {
    Event(WatchEvent<K>),
    Disconnect,
}

type Slot = (Option<String>, String);

struct State<K> {
    objects: BTreeMap<Slot, K>,
    last_version: u64,
    faults: Vec<(StoreOperation, Fault)>,
    calls: HashMap<StoreOperation, usize>,
}

/// In-memory store for one kind
pub struct MemoryStore<K> {
    kind: String,
    state: Mutex<State<K>>,
    feed: broadcast::Sender<Feed<K>>,
}

impl<K> fmt::Debug for MemoryStore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl<K: StoredObject> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: StoredObject> MemoryStore<K> {
    #[must_use]
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            kind: K::kind(&()).into_owned(),
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                last_version: 0,
                faults: Vec::new(),
                calls: HashMap::new(),
            }),
            feed,
        }
    }

    /// Make the next call of `operation` fail with `fault`
    pub fn fail_next(&self, operation: StoreOperation, fault: Fault) {
        self.lock().faults.push((operation, fault));
    }

    /// Number of times `operation` has been called, failed calls included
    pub fn call_count(&self, operation: StoreOperation) -> usize {
        self.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// End every open watch stream with an error
    pub fn disconnect_watchers(&self) {
        let _ = self.feed.send(Feed::Disconnect);
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: WatchEvent<K>) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.feed.send(Feed::Event(event));
    }

    fn key_for(&self, obj: &K) -> Result<ObjectKey, StoreError> {
        let meta = obj.meta();
        match meta.name.as_deref() {
            Some(name) if !name.is_empty() => {
                Ok(ObjectKey::new(self.kind.clone(), meta.namespace.as_deref(), name))
            }
            _ => Err(StoreError::Invalid {
                key: ObjectKey::new(self.kind.clone(), meta.namespace.as_deref(), ""),
                message: "metadata.name is required".to_string(),
            }),
        }
    }

    /// Record the call and surface an injected fault, if any
    fn begin(
        state: &mut State<K>,
        operation: StoreOperation,
        key: &ObjectKey,
    ) -> Result<(), StoreError> {
        *state.calls.entry(operation).or_insert(0) += 1;
        let Some(index) = state.faults.iter().position(|(op, _)| *op == operation) else {
            return Ok(());
        };
        let (_, fault) = state.faults.remove(index);
        debug!(operation = ?operation, key = %key, fault = ?fault, "injecting store fault");
        Err(match fault {
            Fault::Conflict => StoreError::Conflict {
                key: key.clone(),
                message: "the object has been modified; please apply your changes to the latest version".to_string(),
            },
            Fault::Unavailable => StoreError::Unavailable(format!("{operation:?} on {key} failed")),
            Fault::Rejected => StoreError::Invalid {
                key: key.clone(),
                message: format!("admission webhook denied {operation:?}"),
            },
        })
    }

    fn next_version(state: &mut State<K>) -> String {
        state.last_version += 1;
        state.last_version.to_string()
    }
}

fn slot(key: &ObjectKey) -> Slot {
    (key.namespace.clone(), key.name.clone())
}

fn now() -> Result<Time, StoreError> {
    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    serde_json::from_value(Value::String(stamp))
        .map_err(|e| StoreError::Unavailable(format!("failed to build timestamp: {e}")))
}

fn invalid(key: &ObjectKey, error: &serde_json::Error) -> StoreError {
    StoreError::Invalid {
        key: key.clone(),
        message: error.to_string(),
    }
}

fn check_version<K: StoredObject>(key: &ObjectKey, stored: &K, incoming: &K) -> Result<(), StoreError> {
    let current = stored.meta().resource_version.as_deref();
    match incoming.meta().resource_version.as_deref() {
        Some(requested) if Some(requested) != current => Err(StoreError::Conflict {
            key: key.clone(),
            message: format!(
                "resourceVersion {requested} is stale, current is {}",
                current.unwrap_or("none")
            ),
        }),
        _ => Ok(()),
    }
}

fn status_of<K: StoredObject>(obj: &K) -> Result<Option<Value>, serde_json::Error> {
    let value = serde_json::to_value(obj)?;
    Ok(value.get("status").filter(|s| !s.is_null()).cloned())
}

/// Copy of `target` carrying `status` instead of its own
fn with_status<K: StoredObject>(target: &K, status: Option<Value>) -> Result<K, serde_json::Error> {
    let mut value = serde_json::to_value(target)?;
    if let Value::Object(map) = &mut value {
        match status {
            Some(status) => {
                map.insert("status".to_string(), status);
            }
            None => {
                map.remove("status");
            }
        }
    }
    serde_json::from_value(value)
}

/// Everything that is neither metadata nor status
fn desired_state<K: StoredObject>(obj: &K) -> Result<Value, serde_json::Error> {
    let mut value = serde_json::to_value(obj)?;
    if let Value::Object(map) = &mut value {
        for field in ["metadata", "status", "apiVersion", "kind"] {
            map.remove(field);
        }
    }
    Ok(value)
}

#[async_trait]
impl<K: StoredObject> ReadResource<K> for MemoryStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        let mut state = self.lock();
        Self::begin(&mut state, StoreOperation::Get, key)?;
        Ok(state.objects.get(&slot(key)).cloned())
    }
}

#[async_trait]
impl<K: StoredObject> WriteResource<K> for MemoryStore<K> {
    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let key = self.key_for(obj)?;
        let mut state = self.lock();
        Self::begin(&mut state, StoreOperation::Create, &key)?;
        if state.objects.contains_key(&slot(&key)) {
            return Err(StoreError::AlreadyExists(key));
        }

        let mut created = with_status(obj, None).map_err(|e| invalid(&key, &e))?;
        let version = Self::next_version(&mut state);
        let meta = created.meta_mut();
        meta.uid = Some(Uuid::new_v4().to_string());
        meta.resource_version = Some(version);
        meta.generation = Some(1);
        meta.creation_timestamp = Some(now()?);
        meta.deletion_timestamp = None;

        state.objects.insert(slot(&key), created.clone());
        self.publish(WatchEvent::Applied(created.clone()));
        Ok(created)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let key = self.key_for(obj)?;
        let mut state = self.lock();
        Self::begin(&mut state, StoreOperation::Update, &key)?;
        let stored = state
            .objects
            .get(&slot(&key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        check_version(&key, &stored, obj)?;

        let deleting = stored.meta().deletion_timestamp.is_some();
        if deleting && obj.finalizers().iter().any(|f| !stored.finalizers().contains(f)) {
            return Err(StoreError::Invalid {
                key,
                message: "no new finalizers can be added while the object is being deleted"
                    .to_string(),
            });
        }

        let status = status_of(&stored).map_err(|e| invalid(&key, &e))?;
        let mut next = with_status(obj, status).map_err(|e| invalid(&key, &e))?;
        let spec_changed = desired_state(&stored).map_err(|e| invalid(&key, &e))?
            != desired_state(&next).map_err(|e| invalid(&key, &e))?;
        let version = Self::next_version(&mut state);

        let previous = stored.meta();
        let meta = next.meta_mut();
        meta.uid.clone_from(&previous.uid);
        meta.creation_timestamp.clone_from(&previous.creation_timestamp);
        meta.deletion_timestamp.clone_from(&previous.deletion_timestamp);
        meta.generation = Some(previous.generation.unwrap_or(1) + i64::from(spec_changed));
        meta.resource_version = Some(version);

        if deleting && next.finalizers().is_empty() {
            debug!(key = %key, "last finalizer removed, deleting object");
            state.objects.remove(&slot(&key));
            self.publish(WatchEvent::Deleted(next.clone()));
        } else {
            state.objects.insert(slot(&key), next.clone());
            self.publish(WatchEvent::Applied(next.clone()));
        }
        Ok(next)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::begin(&mut state, StoreOperation::Delete, key)?;
        let Some(stored) = state.objects.get(&slot(key)).cloned() else {
            return Ok(());
        };

        if stored.finalizers().is_empty() {
            state.objects.remove(&slot(key));
            self.publish(WatchEvent::Deleted(stored));
            return Ok(());
        }
        if stored.meta().deletion_timestamp.is_some() {
            return Ok(());
        }

        let mut next = stored;
        let version = Self::next_version(&mut state);
        let meta = next.meta_mut();
        meta.deletion_timestamp = Some(now()?);
        meta.resource_version = Some(version);
        debug!(key = %key, finalizers = ?next.finalizers(), "deletion requested, waiting on finalizers");
        state.objects.insert(slot(key), next.clone());
        self.publish(WatchEvent::Applied(next));
        Ok(())
    }
}

#[async_trait]
impl<K: StoredObject> WriteStatus<K> for MemoryStore<K> {
    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let key = self.key_for(obj)?;
        let mut state = self.lock();
        Self::begin(&mut state, StoreOperation::UpdateStatus, &key)?;
        let stored = state
            .objects
            .get(&slot(&key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        check_version(&key, &stored, obj)?;

        let status = status_of(obj).map_err(|e| invalid(&key, &e))?;
        let mut next = with_status(&stored, status).map_err(|e| invalid(&key, &e))?;
        next.meta_mut().resource_version = Some(Self::next_version(&mut state));

        state.objects.insert(slot(&key), next.clone());
        self.publish(WatchEvent::Applied(next.clone()));
        Ok(next)
    }
}

#[async_trait]
impl<K: StoredObject> WatchResource<K> for MemoryStore<K> {
    async fn list(&self) -> Result<Vec<K>, StoreError> {
        let mut state = self.lock();
        Self::begin(
            &mut state,
            StoreOperation::List,
            &ObjectKey::new(self.kind.clone(), None, ""),
        )?;
        Ok(state.objects.values().cloned().collect())
    }

    async fn watch(
        &self,
    ) -> Result<BoxStream<'static, Result<WatchEvent<K>, StoreError>>, StoreError> {
        {
            let mut state = self.lock();
            Self::begin(
                &mut state,
                StoreOperation::Watch,
                &ObjectKey::new(self.kind.clone(), None, ""),
            )?;
        }
        let receiver = self.feed.subscribe();
        let events = stream::unfold(Some(receiver), |receiver| async move {
            let mut receiver = receiver?;
            match receiver.recv().await {
                Ok(Feed::Event(event)) => Some((Ok(event), Some(receiver))),
                Ok(Feed::Disconnect) => Some((
                    Err(StoreError::Watch("watch connection closed".to_string())),
                    None,
                )),
                Err(broadcast::error::RecvError::Lagged(missed)) => Some((
                    Err(StoreError::Watch(format!("watch fell behind by {missed} events"))),
                    None,
                )),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(events.boxed())
    }
}

/// One [`MemoryStore`] per kind, shared by every component that asks for it
#[derive(Clone, Default)]
pub struct MemoryBackend {
    stores: Arc<Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>>,
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds = self
            .stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("MemoryBackend").field("kinds", &kinds).finish()
    }
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The store for kind `K`, created on first use
    pub fn store<K: StoredObject>(&self) -> Arc<MemoryStore<K>> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = stores
            .get(&TypeId::of::<K>())
            .and_then(|s| s.downcast_ref::<Arc<MemoryStore<K>>>())
        {
            return Arc::clone(store);
        }
        let store = Arc::new(MemoryStore::<K>::new());
        stores.insert(TypeId::of::<K>(), Box::new(Arc::clone(&store)));
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ObjectStatus, ReconcileStatus, Team, TeamSpec};

    fn team(name: &str) -> Team {
        Team::new(
            name,
            TeamSpec {
                summary: "Platform".into(),
                description: String::new(),
            },
        )
    }

    fn key(name: &str) -> ObjectKey {
        ObjectKey::of::<Team>(None, name)
    }

    #[tokio::test]
    async fn test_create_sets_generation_and_version() {
        let store = MemoryStore::<Team>::new();
        let created = store.create(&team("t1")).await.unwrap();
        assert_eq!(created.metadata.generation, Some(1));
        assert!(created.metadata.resource_version.is_some());
        assert!(created.metadata.uid.is_some());
        assert!(created.status.is_none());

        let err = store.create(&team("t1")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_generation_bumps_only_on_spec_change() {
        let store = MemoryStore::<Team>::new();
        let created = store.create(&team("t1")).await.unwrap();

        let mut with_status = created.clone();
        with_status.status = Some(ObjectStatus::success(Some(1)));
        let after_status = store.update_status(&with_status).await.unwrap();
        assert_eq!(after_status.metadata.generation, Some(1));
        assert_eq!(
            after_status.status.as_ref().map(|s| s.status),
            Some(ReconcileStatus::Success)
        );

        let mut labelled = after_status.clone();
        labelled
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert("tier".into(), "gold".into());
        let after_label = store.update(&labelled).await.unwrap();
        assert_eq!(after_label.metadata.generation, Some(1));
        assert!(after_label.status.is_some(), "update must not drop status");

        let mut edited = after_label.clone();
        edited.spec.summary = "Payments".into();
        let after_edit = store.update(&edited).await.unwrap();
        assert_eq!(after_edit.metadata.generation, Some(2));
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let store = MemoryStore::<Team>::new();
        let created = store.create(&team("t1")).await.unwrap();
        let mut first = created.clone();
        first.spec.summary = "one".into();
        store.update(&first).await.unwrap();

        let mut second = created;
        second.spec.summary = "two".into();
        let err = store.update(&second).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizers() {
        let store = MemoryStore::<Team>::new();
        let mut t1 = team("t1");
        t1.metadata.finalizers = Some(vec!["teams".into()]);
        store.create(&t1).await.unwrap();

        store.delete(&key("t1")).await.unwrap();
        let pending = store.get(&key("t1")).await.unwrap().unwrap();
        assert!(pending.metadata.deletion_timestamp.is_some());

        let mut readd = pending.clone();
        readd.metadata.finalizers = Some(vec!["teams".into(), "other".into()]);
        assert!(store.update(&readd).await.unwrap_err().is_invalid());

        let mut released = pending;
        released.metadata.finalizers = Some(vec![]);
        store.update(&released).await.unwrap();
        assert!(store.get(&key("t1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_object_is_ok() {
        let store = MemoryStore::<Team>::new();
        store.delete(&key("ghost")).await.unwrap();
    }

    #[tokio::test]
    async fn test_injected_fault_fires_once() {
        let store = MemoryStore::<Team>::new();
        store.fail_next(StoreOperation::Get, Fault::Unavailable);
        assert!(store.get(&key("t1")).await.is_err());
        assert!(store.get(&key("t1")).await.unwrap().is_none());
        assert_eq!(store.call_count(StoreOperation::Get), 2);
    }

    #[tokio::test]
    async fn test_watch_sees_writes_and_disconnects() {
        let store = MemoryStore::<Team>::new();
        let mut events = store.watch().await.unwrap();
        store.create(&team("t1")).await.unwrap();

        let first = events.next().await.unwrap().unwrap();
        assert!(matches!(first, WatchEvent::Applied(ref t) if t.metadata.name.as_deref() == Some("t1")));

        store.disconnect_watchers();
        assert!(events.next().await.unwrap().is_err());
        assert!(events.next().await.is_none());
    }

    #[test]
    fn test_backend_shares_store_per_kind() {
        let backend = MemoryBackend::new();
        let a = backend.store::<Team>();
        let b = backend.store::<Team>();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
