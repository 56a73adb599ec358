//! Per-thread subscription state.
//!
//! The registry maps each thread to its own state: the ordered subscriber
//! list, the seen-set used for deduplication, and the turn slot that keeps
//! one turn in flight per thread.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, TryLockError};

use crate::dedup::{Admitted, SeenSet};
use crate::message::Snapshot;
use crate::sink::Sink;
use crate::thread::ThreadId;

/// Handle returned by `subscribe`, used to remove that one subscription.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize)]
pub struct SubscriptionHandle(pub u64);

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// One registered sink.
pub(crate) struct Subscriber {
    pub handle: SubscriptionHandle,
    pub sink: Arc<dyn Sink>,
    /// Cleared on unsubscribe; checked under `gate` right before each delivery
    active: AtomicBool,
    /// Serializes deliveries to this subscription
    pub gate: Mutex<()>,
}

impl Subscriber {
    fn new(handle: SubscriptionHandle, sink: Arc<dyn Sink>) -> Self {
        Self {
            handle,
            sink,
            active: AtomicBool::new(true),
            gate: Mutex::new(()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Everything the dispatcher tracks for one thread.
pub(crate) struct ThreadState {
    pub id: ThreadId,
    pub created_at: DateTime<Utc>,
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    seen: Mutex<SeenSet>,
    /// Held for the duration of a turn, and while the thread is being closed
    turn: Arc<Mutex<()>>,
    /// Set once the state has been dropped from the registry
    closed: AtomicBool,
}

impl ThreadState {
    fn new(id: ThreadId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            subscribers: RwLock::new(Vec::new()),
            seen: Mutex::new(SeenSet::new()),
            turn: Arc::new(Mutex::new(())),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a subscription. Returns false if the state was closed, in
    /// which case the caller must look the thread up again.
    pub async fn add(&self, handle: SubscriptionHandle, sink: Arc<dyn Sink>) -> bool {
        let mut subscribers = self.subscribers.write().await;
        if self.is_closed() {
            return false;
        }
        subscribers.push(Arc::new(Subscriber::new(handle, sink)));
        true
    }

    /// Remove one subscription. Returns false if it was not registered here.
    pub async fn remove(&self, handle: SubscriptionHandle) -> bool {
        let mut subscribers = self.subscribers.write().await;
        match subscribers.iter().position(|s| s.handle == handle) {
            Some(index) => {
                let removed = subscribers.remove(index);
                removed.deactivate();
                true
            }
            None => false,
        }
    }

    /// Mark the state closed and drop every subscription.
    ///
    /// The flag is set under the subscriber lock, so a concurrent `add`
    /// either lands before and is dropped here, or sees the flag and fails.
    pub async fn close(&self) -> usize {
        let mut subscribers = self.subscribers.write().await;
        self.closed.store(true, Ordering::Release);
        for sub in subscribers.iter() {
            sub.deactivate();
        }
        let count = subscribers.len();
        subscribers.clear();
        count
    }

    /// Consistent copy of the subscriber list, in registration order.
    pub async fn subscribers(&self) -> Vec<Arc<Subscriber>> {
        self.subscribers.read().await.clone()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn admit(&self, snapshot: &Snapshot) -> Admitted {
        self.seen.lock().await.admit(snapshot)
    }

    pub async fn seen_count(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn try_acquire_turn(&self) -> Result<OwnedMutexGuard<()>, TryLockError> {
        self.turn.clone().try_lock_owned()
    }

    pub async fn acquire_turn(&self) -> OwnedMutexGuard<()> {
        self.turn.clone().lock_owned().await
    }

    pub fn turn_in_flight(&self) -> bool {
        self.turn.try_lock().is_err()
    }
}

/// Summary of one thread, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub subscribers: usize,
    pub seen_messages: usize,
    pub turn_in_flight: bool,
    pub created_at: DateTime<Utc>,
}

/// Thread id → thread state.
#[derive(Default)]
pub(crate) struct Registry {
    threads: RwLock<HashMap<ThreadId, Arc<ThreadState>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, thread: &ThreadId) -> Option<Arc<ThreadState>> {
        self.threads.read().await.get(thread).cloned()
    }

    pub async fn get_or_create(&self, thread: &ThreadId) -> Arc<ThreadState> {
        if let Some(state) = self.get(thread).await {
            return state;
        }
        self.threads
            .write()
            .await
            .entry(thread.clone())
            .or_insert_with(|| Arc::new(ThreadState::new(thread.clone())))
            .clone()
    }

    /// Drop `state` from the map, unless its id now maps to a newer state.
    pub async fn remove(&self, state: &Arc<ThreadState>) -> bool {
        let mut threads = self.threads.write().await;
        match threads.get(&state.id) {
            Some(current) if Arc::ptr_eq(current, state) => {
                threads.remove(&state.id);
                true
            }
            _ => false,
        }
    }

    pub async fn all(&self) -> Vec<Arc<ThreadState>> {
        self.threads.read().await.values().cloned().collect()
    }

    pub async fn info(state: &ThreadState) -> ThreadInfo {
        ThreadInfo {
            id: state.id.clone(),
            subscribers: state.subscriber_count().await,
            seen_messages: state.seen_count().await,
            turn_in_flight: state.turn_in_flight(),
            created_at: state.created_at,
        }
    }
}
