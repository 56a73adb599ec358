//! Session dispatcher: drives agent turns and fans their output out to
//! every sink subscribed to the thread.
//!
//! ## Delivery rules
//!
//! - A message reaches exactly the sinks subscribed to its thread at the
//!   moment it is dispatched. Late subscribers never see earlier messages.
//! - Snapshots from the agent are cumulative; only ids never seen on the
//!   thread are delivered, so each sink sees each message at most once.
//! - A failing sink (error, panic, timeout) is logged and skipped. It never
//!   stops delivery to the other sinks or fails the turn.
//! - An agent failure ends the turn. Messages already delivered stand.

use futures::{FutureExt, StreamExt};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{OwnedMutexGuard, mpsc};
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::config::{DispatcherConfig, SubmitPolicy};
use crate::error::{DispatchError, SinkError};
use crate::message::{Message, Snapshot};
use crate::metrics::{DispatchMetrics, MetricsSnapshot};
use crate::registry::{Registry, Subscriber, SubscriptionHandle, ThreadInfo, ThreadState};
use crate::sink::{ChannelSink, Sink};
use crate::thread::ThreadId;

/// Outcome of a completed turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TurnSummary {
    /// Snapshots drained from the agent
    pub snapshots: usize,
    /// New messages broadcast to the thread
    pub messages: usize,
    /// Successful sink deliveries (messages × reached sinks)
    pub deliveries: usize,
    /// Messages skipped because they had already been delivered
    pub suppressed: usize,
}

enum Delivery {
    Delivered,
    /// Unsubscribed after the fan-out list was taken
    Skipped,
    Failed(SinkError),
}

/// Routes agent output for many threads to many sinks.
pub struct SessionDispatcher {
    agent: Arc<dyn Agent>,
    registry: Registry,
    config: DispatcherConfig,
    metrics: Arc<DispatchMetrics>,
    next_handle: AtomicU64,
}

impl SessionDispatcher {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self::with_config(agent, DispatcherConfig::default())
    }

    pub fn with_config(agent: Arc<dyn Agent>, config: DispatcherConfig) -> Self {
        Self {
            agent,
            registry: Registry::new(),
            config,
            metrics: Arc::new(DispatchMetrics::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Register `sink` for `thread`. Unknown threads are created on the fly.
    pub async fn subscribe(&self, thread: &ThreadId, sink: Arc<dyn Sink>) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        loop {
            let state = self.registry.get_or_create(thread).await;
            if state.add(handle, sink.clone()).await {
                break;
            }
            // Closed between lookup and add
        }
        self.metrics.subscribed();
        debug!("[DISPATCH {}] subscribed {}", thread, handle);
        handle
    }

    /// Register a channel-backed sink and hand back the receiving half.
    pub async fn subscribe_channel(
        &self,
        thread: &ThreadId,
    ) -> (SubscriptionHandle, mpsc::Receiver<Message>) {
        let (sink, rx) = ChannelSink::channel(self.config.channel_capacity);
        let handle = self.subscribe(thread, Arc::new(sink)).await;
        (handle, rx)
    }

    /// Remove one subscription. Unknown threads or handles are a no-op.
    ///
    /// The thread itself is kept even when its last subscriber leaves.
    pub async fn unsubscribe(&self, thread: &ThreadId, handle: SubscriptionHandle) -> bool {
        let Some(state) = self.registry.get(thread).await else {
            return false;
        };
        let removed = state.remove(handle).await;
        if removed {
            self.metrics.unsubscribed();
            debug!("[DISPATCH {}] unsubscribed {}", thread, handle);
        }
        removed
    }

    /// Run one turn for `thread` and deliver its new messages as they arrive.
    ///
    /// Returns once the agent's stream ends. Output is observed through the
    /// subscribed sinks; the summary is informational.
    pub async fn submit(
        &self,
        thread: &ThreadId,
        user_text: &str,
    ) -> Result<TurnSummary, DispatchError> {
        let (state, _turn) = self.claim_turn(thread).await?;

        self.metrics.turn_started();
        info!("[TURN {}] started", thread);

        let mut stream = self.agent.invoke_turn(thread, user_text);
        let mut summary = TurnSummary::default();

        while let Some(item) = stream.next().await {
            let snapshot = match item {
                Ok(snapshot) => snapshot,
                Err(source) => {
                    self.metrics.turn_failed();
                    warn!(
                        "[TURN {}] agent failed after {} message(s): {}",
                        thread, summary.messages, source
                    );
                    return Err(DispatchError::Agent {
                        thread: thread.clone(),
                        source,
                    });
                }
            };
            summary.snapshots += 1;
            self.dispatch_snapshot(&state, &snapshot, &mut summary)
                .await;
        }

        self.metrics.turn_completed();
        info!(
            "[TURN {}] completed: {} snapshot(s), {} new message(s), {} suppressed",
            thread, summary.snapshots, summary.messages, summary.suppressed
        );
        Ok(summary)
    }

    /// Deliver a single message outside of a turn.
    ///
    /// The message goes through the thread's seen-set like any turn output:
    /// an id that was already delivered is dropped and 0 is returned.
    /// A publish racing `close_thread` lands before the close: it reaches
    /// only sinks that are still active.
    pub async fn publish(&self, thread: &ThreadId, message: Message) -> usize {
        let state = self.registry.get_or_create(thread).await;
        let mut summary = TurnSummary::default();
        self.dispatch_snapshot(&state, &Snapshot::new(vec![message]), &mut summary)
            .await;
        summary.deliveries
    }

    /// Forget a thread: drop its subscribers and seen-set.
    ///
    /// Fails with `TurnInProgress` while a turn is running on the thread.
    /// A later subscribe or submit starts the thread afresh.
    pub async fn close_thread(&self, thread: &ThreadId) -> Result<bool, DispatchError> {
        let Some(state) = self.registry.get(thread).await else {
            return Ok(false);
        };
        // Held until the state is closed, so no turn can start on it meanwhile
        let _turn = state.try_acquire_turn().map_err(|_| {
            warn!("[DISPATCH {}] close refused: turn in progress", thread);
            DispatchError::TurnInProgress {
                thread: thread.clone(),
            }
        })?;
        if !self.registry.remove(&state).await {
            return Ok(false);
        }
        let dropped = state.close().await;
        for _ in 0..dropped {
            self.metrics.unsubscribed();
        }
        info!(
            "[DISPATCH {}] closed ({} subscriber(s) dropped)",
            thread, dropped
        );
        Ok(true)
    }

    pub async fn subscriber_count(&self, thread: &ThreadId) -> usize {
        match self.registry.get(thread).await {
            Some(state) => state.subscriber_count().await,
            None => 0,
        }
    }

    /// All known threads, sorted by id.
    pub async fn threads(&self) -> Vec<ThreadInfo> {
        let mut infos = Vec::new();
        for state in self.registry.all().await {
            infos.push(Registry::info(&state).await);
        }
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Take the turn slot of the thread's current state.
    ///
    /// A state closed while we waited for its slot is no longer registered,
    /// so the lookup is retried against the fresh one.
    async fn claim_turn(
        &self,
        thread: &ThreadId,
    ) -> Result<(Arc<ThreadState>, OwnedMutexGuard<()>), DispatchError> {
        loop {
            let state = self.registry.get_or_create(thread).await;
            let guard = match self.config.submit_policy {
                SubmitPolicy::Reject => match state.try_acquire_turn() {
                    Ok(guard) => guard,
                    Err(_) => {
                        self.metrics.turn_rejected();
                        warn!("[TURN {}] rejected: turn already in progress", thread);
                        return Err(DispatchError::TurnInProgress {
                            thread: thread.clone(),
                        });
                    }
                },
                SubmitPolicy::Queue => state.acquire_turn().await,
            };
            if !state.is_closed() {
                return Ok((state, guard));
            }
        }
    }

    async fn dispatch_snapshot(
        &self,
        state: &ThreadState,
        snapshot: &Snapshot,
        summary: &mut TurnSummary,
    ) {
        let admitted = state.admit(snapshot).await;
        if admitted.suppressed > 0 {
            self.metrics.duplicates(admitted.suppressed);
            summary.suppressed += admitted.suppressed;
        }
        for message in &admitted.fresh {
            summary.messages += 1;
            summary.deliveries += self.broadcast(state, message).await;
        }
    }

    /// Fan one message out to the thread's current subscribers, in
    /// registration order. Returns the number of successful deliveries.
    async fn broadcast(&self, state: &ThreadState, message: &Message) -> usize {
        let subscribers = state.subscribers().await;
        let mut delivered = 0;
        for subscriber in &subscribers {
            match self.deliver(subscriber, message).await {
                Delivery::Delivered => {
                    delivered += 1;
                    self.metrics.message_delivered();
                }
                Delivery::Skipped => {}
                Delivery::Failed(err) => {
                    self.metrics.sink_failed();
                    warn!(
                        "[DISPATCH {}] delivery of {} to {} failed: {}",
                        state.id, message.id, subscriber.handle, err
                    );
                }
            }
        }
        debug!(
            "[DISPATCH {}] {} -> {}/{} sink(s)",
            state.id,
            message.id,
            delivered,
            subscribers.len()
        );
        delivered
    }

    async fn deliver(&self, subscriber: &Subscriber, message: &Message) -> Delivery {
        let _gate = subscriber.gate.lock().await;
        if !subscriber.is_active() {
            return Delivery::Skipped;
        }

        let delivery = AssertUnwindSafe(subscriber.sink.deliver(message)).catch_unwind();
        let outcome = match self.config.delivery_timeout {
            Some(limit) => match tokio::time::timeout(limit, delivery).await {
                Ok(outcome) => outcome,
                Err(_) => return Delivery::Failed(SinkError::Timeout),
            },
            None => delivery.await,
        };

        match outcome {
            Ok(Ok(())) => Delivery::Delivered,
            Ok(Err(err)) => Delivery::Failed(err),
            Err(panic) => Delivery::Failed(SinkError::Panicked(panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
