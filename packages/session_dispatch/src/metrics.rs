//! Dispatcher metrics for observability

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Dispatcher-wide counters
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    // Turn metrics
    pub turns_started: AtomicU64,
    pub turns_completed: AtomicU64,
    pub turns_failed: AtomicU64,
    /// Submissions rejected because a turn was already in flight
    pub turns_rejected: AtomicU64,

    // Delivery metrics
    /// Successful sink deliveries (one per message per sink)
    pub messages_delivered: AtomicU64,
    /// Messages dropped because their id was already seen on the thread
    pub duplicates_suppressed: AtomicU64,
    /// Sink deliveries that errored, panicked or timed out
    pub sink_failures: AtomicU64,

    // Subscription metrics
    pub subscriptions: AtomicU64,
    pub unsubscriptions: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turn_started(&self) {
        self.turns_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn turn_completed(&self) {
        self.turns_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn turn_failed(&self) {
        self.turns_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn turn_rejected(&self) {
        self.turns_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn duplicates(&self, count: usize) {
        self.duplicates_suppressed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn sink_failed(&self) {
        self.sink_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscribed(&self) {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unsubscribed(&self) {
        self.unsubscriptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            turns_started: self.turns_started.load(Ordering::Relaxed),
            turns_completed: self.turns_completed.load(Ordering::Relaxed),
            turns_failed: self.turns_failed.load(Ordering::Relaxed),
            turns_rejected: self.turns_rejected.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
            unsubscriptions: self.unsubscriptions.load(Ordering::Relaxed),
        }
    }
}

/// Serializable point-in-time view of [`DispatchMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub turns_started: u64,
    pub turns_completed: u64,
    pub turns_failed: u64,
    pub turns_rejected: u64,
    pub messages_delivered: u64,
    pub duplicates_suppressed: u64,
    pub sink_failures: u64,
    pub subscriptions: u64,
    pub unsubscriptions: u64,
}

impl MetricsSnapshot {
    /// Subscriptions currently registered across all threads
    pub fn active_subscriptions(&self) -> u64 {
        self.subscriptions.saturating_sub(self.unsubscriptions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = DispatchMetrics::new();
        metrics.turn_started();
        metrics.turn_started();
        metrics.turn_completed();
        metrics.duplicates(3);
        metrics.subscribed();
        metrics.subscribed();
        metrics.unsubscribed();

        let snap = metrics.snapshot();
        assert_eq!(snap.turns_started, 2);
        assert_eq!(snap.turns_completed, 1);
        assert_eq!(snap.duplicates_suppressed, 3);
        assert_eq!(snap.active_subscriptions(), 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snap = DispatchMetrics::new().snapshot();
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["sink_failures"], 0);
    }
}
