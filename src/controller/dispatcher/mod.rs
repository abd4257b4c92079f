//! # Watch/Queue Dispatcher
//!
//! Feeds one resource kind's change events to a reconciler.
//!
//! ## Flow
//!
//! 1. Open the watch, then list every object and queue it (startup resync)
//! 2. Forward watch events through the [`GenerationTracker`] so status-only
//!    updates are dropped
//! 3. Re-list on a fixed interval to heal from missed events
//! 4. A pool of workers takes keys from the [`WorkQueue`], reconciles them and
//!    schedules the follow-up through the error policy
//!
//! The event loop never awaits a reconcile. Watch failures end [`Controller::run`]
//! with an error so the manager can restart it; queued keys survive the restart.

mod filter;
mod queue;

pub use filter::{should_dispatch, GenerationTracker};
pub use queue::WorkQueue;

use super::backoff::{BackoffTracker, ExponentialBackoff};
use super::error::{ManagerError, ReconcileError};
use super::manager::Controller;
use super::reconciler::Reconciler;
use crate::config::ControllerConfig;
use crate::observability;
use crate::runtime::error_policy::{error_policy, Action};
use crate::store::{ObjectKey, StoreError, StoredObject, WatchEvent, WatchResource};
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// State shared between the event loop and the workers
struct Shared {
    name: String,
    queue: Arc<WorkQueue>,
    reconciler: Arc<dyn Reconciler>,
    backoff: Mutex<BackoffTracker>,
}

impl Shared {
    fn lock_backoff(&self) -> MutexGuard<'_, BackoffTracker> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn process(&self, key: &ObjectKey) {
        let span = info_span!(
            "controller.reconcile",
            controller = %self.name,
            resource.kind = %key.kind,
            resource.name = %key.name,
        );
        async {
            observability::metrics::increment_reconciliations(&self.name);
            let started = Instant::now();
            // A panicking pass must still reach `done`, or the key stays parked.
            let result = AssertUnwindSafe(self.reconciler.reconcile(key))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(ReconcileError::Panicked {
                        key: key.clone(),
                        message: panic_message(payload.as_ref()),
                    })
                });
            observability::metrics::observe_reconciliation_duration(
                &self.name,
                started.elapsed().as_secs_f64(),
            );

            let action = {
                let mut backoff = self.lock_backoff();
                error_policy(&self.name, key, &result, &mut backoff)
            };
            match action {
                Action::Await => {}
                Action::Requeue => {
                    self.queue.add(key.clone());
                }
                Action::RequeueAfter(delay) => self.queue.add_after(key.clone(), delay),
            }
        }
        .instrument(span)
        .await;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

async fn worker(shared: Arc<Shared>, stop: CancellationToken) {
    loop {
        let key = tokio::select! {
            () = stop.cancelled() => break,
            key = shared.queue.get() => match key {
                Some(key) => key,
                None => break,
            },
        };
        // Not cancelled mid-pass: a started reconcile always runs to completion.
        shared.process(&key).await;
        shared.queue.done(&key);
    }
}

/// Watch, filter, queue and reconcile one kind
pub struct Dispatcher<K, S: ?Sized> {
    store: Arc<S>,
    shared: Arc<Shared>,
    tracker: Mutex<GenerationTracker>,
    worker_count: usize,
    resync_interval: Duration,
    _kind: PhantomData<fn() -> K>,
}

impl<K, S: ?Sized> fmt::Debug for Dispatcher<K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.shared.name)
            .field("worker_count", &self.worker_count)
            .field("resync_interval", &self.resync_interval)
            .finish_non_exhaustive()
    }
}

impl<K, S> Dispatcher<K, S>
where
    K: StoredObject,
    S: WatchResource<K> + ?Sized,
{
    pub fn new(reconciler: Arc<dyn Reconciler>, store: Arc<S>, config: &ControllerConfig) -> Self {
        let name = reconciler.name().to_string();
        Self {
            store,
            shared: Arc::new(Shared {
                queue: Arc::new(WorkQueue::new(name.clone())),
                name,
                reconciler,
                backoff: Mutex::new(BackoffTracker::new(ExponentialBackoff::new(
                    config.backoff_base,
                    config.backoff_max,
                ))),
            }),
            tracker: Mutex::new(GenerationTracker::new()),
            worker_count: config.worker_count.max(1),
            resync_interval: config.resync_interval,
            _kind: PhantomData,
        }
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.shared.queue
    }

    fn lock_tracker(&self) -> MutexGuard<'_, GenerationTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue every object of the kind, bypassing the generation filter
    ///
    /// # Errors
    ///
    /// Returns the store error if the list call fails.
    pub async fn resync(&self) -> Result<usize, StoreError> {
        let objects = self.store.list().await?;
        let _span = info_span!("controller.dispatch.resync", controller = %self.shared.name).entered();
        let mut tracker = self.lock_tracker();
        for obj in &objects {
            let key = ObjectKey::for_object(obj);
            let meta = obj.meta();
            tracker.record(&key, meta.generation, meta.deletion_timestamp.is_some());
            self.shared.queue.add(key);
        }
        debug!(count = objects.len(), "resync queued objects");
        Ok(objects.len())
    }

    /// Route one watch event to the queue
    pub fn handle_event(&self, event: WatchEvent<K>) {
        match event {
            WatchEvent::Applied(obj) => {
                let key = ObjectKey::for_object(&obj);
                let meta = obj.meta();
                let forward = self.lock_tracker().observe(
                    &key,
                    meta.generation,
                    meta.deletion_timestamp.is_some(),
                );
                if forward {
                    trace!(controller = %self.shared.name, resource.name = %key.name, generation = ?meta.generation, "dispatching");
                    self.shared.queue.add(key);
                }
            }
            WatchEvent::Deleted(obj) => {
                let key = ObjectKey::for_object(&obj);
                self.lock_tracker().forget(&key);
                self.shared.lock_backoff().reset(&key);
                debug!(controller = %self.shared.name, resource.name = %key.name, "object removed from store");
            }
        }
    }

    async fn watch_loop(
        &self,
        cancel: &CancellationToken,
        ready: &watch::Sender<bool>,
    ) -> Result<(), ManagerError> {
        let name = &self.shared.name;
        // Watch before listing so nothing written in between is missed.
        let mut events = self.store.watch().await.map_err(|source| ManagerError::Watch {
            controller: name.clone(),
            source,
        })?;
        let listed = self.resync().await.map_err(|source| ManagerError::List {
            controller: name.clone(),
            source,
        })?;
        ready.send_replace(true);
        info!(controller = %name, objects = listed, "watch established");

        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.resync_interval, self.resync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = self.resync().await {
                        warn!(controller = %name, error = %e, "periodic resync failed");
                    }
                }
                event = events.next() => match event {
                    Some(Ok(event)) => self.handle_event(event),
                    Some(Err(source)) => {
                        return Err(ManagerError::Watch {
                            controller: name.clone(),
                            source,
                        })
                    }
                    None => return Err(ManagerError::WatchClosed(name.clone())),
                },
            }
        }
    }
}

#[async_trait]
impl<K, S> Controller for Dispatcher<K, S>
where
    K: StoredObject,
    S: WatchResource<K> + ?Sized + 'static,
{
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn run(
        &self,
        cancel: CancellationToken,
        ready: &watch::Sender<bool>,
    ) -> Result<(), ManagerError> {
        let stop_workers = CancellationToken::new();
        let mut workers = JoinSet::new();
        for _ in 0..self.worker_count {
            workers.spawn(worker(Arc::clone(&self.shared), stop_workers.clone()));
        }

        let result = self.watch_loop(&cancel, ready).await;

        ready.send_replace(false);
        stop_workers.cancel();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(controller = %self.shared.name, error = %e, "worker task failed");
            }
        }
        if cancel.is_cancelled() {
            self.shared.queue.shut_down();
            info!(controller = %self.shared.name, "dispatcher stopped");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Outcome;
    use crate::crd::{Team, TeamSpec};
    use crate::store::MemoryStore;

    #[derive(Debug)]
    struct AlwaysUnavailable;

    #[async_trait]
    impl Reconciler for AlwaysUnavailable {
        fn name(&self) -> &str {
            "unavailable"
        }

        async fn reconcile(&self, _key: &ObjectKey) -> Result<Outcome, ReconcileError> {
            Err(StoreError::Unavailable("api server down".into()).into())
        }
    }

    #[tokio::test]
    async fn test_deleted_event_resets_backoff() {
        let store = Arc::new(MemoryStore::<Team>::new());
        let dispatcher = Dispatcher::new(
            Arc::new(AlwaysUnavailable),
            Arc::clone(&store),
            &ControllerConfig::default(),
        );
        let team = Team::new(
            "t1",
            TeamSpec {
                summary: "t1 team".into(),
                description: String::new(),
            },
        );
        let key = ObjectKey::for_object(&team);

        dispatcher.shared.process(&key).await;
        dispatcher.shared.process(&key).await;
        assert_eq!(dispatcher.shared.lock_backoff().failures(&key), 2);

        dispatcher.handle_event(WatchEvent::Deleted(team));
        assert_eq!(dispatcher.shared.lock_backoff().failures(&key), 0);
    }
}
