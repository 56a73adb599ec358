use std::collections::HashSet;

use crate::message::{Message, MessageId, Snapshot};

/// Message ids already delivered on one thread.
///
/// Snapshots are cumulative, so the only messages worth delivering from a
/// snapshot are those whose id has never been seen on this thread.
#[derive(Debug, Default)]
pub struct SeenSet {
    ids: HashSet<MessageId>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every unseen message in `snapshot` as seen and return them in
    /// snapshot order. A repeated id inside the same snapshot counts once.
    pub fn admit(&mut self, snapshot: &Snapshot) -> Admitted {
        let mut fresh = Vec::new();
        let mut suppressed = 0;
        for message in &snapshot.messages {
            if self.ids.insert(message.id.clone()) {
                fresh.push(message.clone());
            } else {
                suppressed += 1;
            }
        }
        Admitted { fresh, suppressed }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Result of filtering one snapshot against a seen-set.
#[derive(Debug)]
pub struct Admitted {
    /// Newly seen messages, in snapshot order
    pub fresh: Vec<Message>,
    /// Messages dropped because their id was already seen
    pub suppressed: usize,
}
