//! # Work Queue
//!
//! Deduplicating key queue with per-key serialization.
//!
//! - A key added while already pending is coalesced into the pending item.
//! - A key added while a worker holds it is parked and handed out again only
//!   after that worker calls [`WorkQueue::done`], so one key is never processed
//!   by two workers at once.

use crate::observability::metrics;
use crate::store::ObjectKey;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    /// Keys that need a pass: queued, or parked behind a running pass
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    shut_down: bool,
}

#[derive(Debug)]
pub struct WorkQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report_depth(&self, state: &QueueState) {
        metrics::set_queue_depth(&self.name, state.queue.len());
    }

    /// Mark `key` as needing a pass. Returns false when it was already pending.
    pub fn add(&self, key: ObjectKey) -> bool {
        let mut state = self.lock();
        if state.shut_down || state.dirty.contains(&key) {
            return false;
        }
        state.dirty.insert(key.clone());
        if !state.processing.contains(&key) {
            state.queue.push_back(key);
            self.report_depth(&state);
            drop(state);
            self.notify.notify_one();
        }
        true
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    fn try_take(&self) -> Option<ObjectKey> {
        let mut state = self.lock();
        let key = state.queue.pop_front()?;
        state.dirty.remove(&key);
        state.processing.insert(key.clone());
        self.report_depth(&state);
        if !state.queue.is_empty() {
            self.notify.notify_one();
        }
        Some(key)
    }

    /// Wait for the next key. `None` once the queue is shut down.
    ///
    /// Cancel safe: a key is only taken when this returns.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            if let Some(key) = self.try_take() {
                return Some(key);
            }
            if self.lock().shut_down {
                return None;
            }
            notified.await;
        }
    }

    /// Release `key` after a pass. A key re-added meanwhile is queued again.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shut_down {
            state.queue.push_back(key.clone());
            self.report_depth(&state);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys. Pending keys are dropped.
    pub fn shut_down(&self) {
        let mut state = self.lock();
        state.shut_down = true;
        state.queue.clear();
        state.dirty.clear();
        self.report_depth(&state);
        drop(state);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waiting for a pass, queued or parked
    #[must_use]
    pub fn is_pending(&self, key: &ObjectKey) -> bool {
        self.lock().dirty.contains(key)
    }

    #[must_use]
    pub fn is_processing(&self, key: &ObjectKey) -> bool {
        self.lock().processing.contains(key)
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }
}
