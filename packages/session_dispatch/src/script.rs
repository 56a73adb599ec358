//! Deterministic agent driven by pre-recorded turns.
//!
//! Used by the `dispatch replay` command and throughout the test suite.
//! A script file looks like:
//!
//! ```json
//! {
//!   "thread": "demo",
//!   "turns": [
//!     {
//!       "input": "hello",
//!       "snapshots": [
//!         { "messages": [ { "id": "u1", "kind": "text", "role": "user", "content": "hello" } ] },
//!         { "delay_ms": 50, "messages": [
//!           { "id": "u1", "kind": "text", "role": "user", "content": "hello" },
//!           { "id": "a1", "kind": "text", "role": "assistant", "content": "hi" }
//!         ] }
//!       ]
//!     }
//!   ]
//! }
//! ```

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::agent::{Agent, SnapshotStream};
use crate::error::AgentError;
use crate::message::Snapshot;
use crate::thread::ThreadId;

/// One snapshot in a scripted turn, optionally delayed to emulate streaming.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScriptedSnapshot {
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(flatten)]
    pub snapshot: Snapshot,
}

impl From<Snapshot> for ScriptedSnapshot {
    fn from(snapshot: Snapshot) -> Self {
        Self {
            delay_ms: 0,
            snapshot,
        }
    }
}

/// A pre-recorded turn: the snapshots to yield and an optional failure after them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TurnScript {
    /// User text to submit when replaying; ignored by the agent itself
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub snapshots: Vec<ScriptedSnapshot>,
    /// Upstream error raised after all snapshots have been yielded
    #[serde(default)]
    pub error: Option<String>,
}

impl TurnScript {
    pub fn new(snapshots: Vec<Snapshot>) -> Self {
        Self {
            input: None,
            snapshots: snapshots.into_iter().map(Into::into).collect(),
            error: None,
        }
    }

    /// Yield `snapshots`, then fail with an upstream error.
    pub fn failing(snapshots: Vec<Snapshot>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(snapshots)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        for snap in &mut self.snapshots {
            snap.delay_ms = ms;
        }
        self
    }
}

/// On-disk replay script.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScriptFile {
    #[serde(default)]
    pub thread: Option<String>,
    pub turns: Vec<TurnScript>,
}

impl ScriptFile {
    pub fn from_json(json: &str) -> Result<Self, AgentError> {
        serde_json::from_str(json).map_err(|e| AgentError::Script(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Script(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }
}

#[derive(Default)]
struct Scripts {
    shared: VecDeque<TurnScript>,
    by_thread: HashMap<ThreadId, VecDeque<TurnScript>>,
    received: Vec<(ThreadId, String)>,
}

/// Agent that replays scripted turns in order.
///
/// Turns queued for a specific thread take priority over the shared queue.
#[derive(Default)]
pub struct ScriptedAgent {
    scripts: Mutex<Scripts>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_turns(turns: impl IntoIterator<Item = TurnScript>) -> Self {
        let agent = Self::new();
        for turn in turns {
            agent.push_turn(turn);
        }
        agent
    }

    /// Queue a turn for whichever thread submits next.
    pub fn push_turn(&self, turn: TurnScript) {
        self.lock().shared.push_back(turn);
    }

    /// Queue a turn for one thread only.
    pub fn push_turn_for(&self, thread: &ThreadId, turn: TurnScript) {
        self.lock()
            .by_thread
            .entry(thread.clone())
            .or_default()
            .push_back(turn);
    }

    /// Every `(thread, user_text)` this agent was invoked with, in call order.
    pub fn received(&self) -> Vec<(ThreadId, String)> {
        self.lock().received.clone()
    }

    pub fn remaining(&self) -> usize {
        let scripts = self.lock();
        scripts.shared.len() + scripts.by_thread.values().map(VecDeque::len).sum::<usize>()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Scripts> {
        // A poisoned lock only means a test panicked mid-push; the queue is still usable
        self.scripts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_turn(&self, thread: &ThreadId, user_text: &str) -> Option<TurnScript> {
        let mut scripts = self.lock();
        scripts
            .received
            .push((thread.clone(), user_text.to_string()));
        let from_thread = scripts
            .by_thread
            .get_mut(thread)
            .and_then(VecDeque::pop_front);
        from_thread.or_else(|| scripts.shared.pop_front())
    }
}

impl Agent for ScriptedAgent {
    fn invoke_turn(&self, thread: &ThreadId, user_text: &str) -> SnapshotStream {
        let Some(turn) = self.next_turn(thread, user_text) else {
            let err = AgentError::Script(format!("no scripted turn left for thread {}", thread));
            return futures::stream::once(async move { Err(err) }).boxed();
        };

        debug!(
            "[SCRIPT {}] replaying {} snapshot(s)",
            thread,
            turn.snapshots.len()
        );

        let mut items: Vec<(u64, Result<Snapshot, AgentError>)> = turn
            .snapshots
            .into_iter()
            .map(|s| (s.delay_ms, Ok(s.snapshot)))
            .collect();
        if let Some(error) = turn.error {
            items.push((0, Err(AgentError::Upstream(error))));
        }

        futures::stream::iter(items)
            .then(|(delay_ms, item)| async move {
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                item
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Role};

    fn thread(id: &str) -> ThreadId {
        ThreadId::new(id).unwrap()
    }

    #[tokio::test]
    async fn test_replays_snapshots_in_order() {
        let agent = ScriptedAgent::with_turns([TurnScript::new(vec![
            Snapshot::new(vec![Message::text("m1", Role::Assistant, "a")]),
            Snapshot::new(vec![
                Message::text("m1", Role::Assistant, "a"),
                Message::text("m2", Role::Assistant, "b"),
            ]),
        ])]);

        let items: Vec<_> = agent.invoke_turn(&thread("t1"), "hi").collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].as_ref().unwrap().len(), 2);
        assert_eq!(agent.received(), vec![(thread("t1"), "hi".to_string())]);
    }

    #[tokio::test]
    async fn test_error_comes_last() {
        let agent = ScriptedAgent::with_turns([TurnScript::failing(
            vec![Snapshot::new(vec![Message::text("m1", Role::Assistant, "a")])],
            "boom",
        )]);
        let items: Vec<_> = agent.invoke_turn(&thread("t1"), "hi").collect().await;
        assert!(items[0].is_ok());
        assert!(matches!(&items[1], Err(AgentError::Upstream(e)) if e == "boom"));
    }

    #[tokio::test]
    async fn test_exhausted_script_fails() {
        let agent = ScriptedAgent::new();
        let items: Vec<_> = agent.invoke_turn(&thread("t1"), "hi").collect().await;
        assert!(matches!(items.as_slice(), [Err(AgentError::Script(_))]));
    }

    #[tokio::test]
    async fn test_thread_specific_turns_take_priority() {
        let agent = ScriptedAgent::new();
        agent.push_turn(TurnScript::new(vec![Snapshot::new(vec![Message::text(
            "shared",
            Role::Assistant,
            "s",
        )])]));
        agent.push_turn_for(
            &thread("t2"),
            TurnScript::new(vec![Snapshot::new(vec![Message::text(
                "own",
                Role::Assistant,
                "o",
            )])]),
        );

        let items: Vec<_> = agent.invoke_turn(&thread("t2"), "x").collect().await;
        let snap = items[0].as_ref().unwrap();
        assert_eq!(snap.messages[0].id.0, "own");
        assert_eq!(agent.remaining(), 1);
    }

    #[test]
    fn test_script_file_parses() {
        let script = ScriptFile::from_json(
            r#"{
                "thread": "demo",
                "turns": [{
                    "input": "hello",
                    "snapshots": [
                        {"messages": [{"id": "u1", "kind": "text", "role": "user", "content": "hello"}]},
                        {"delay_ms": 5, "messages": [
                            {"id": "u1", "kind": "text", "role": "user", "content": "hello"},
                            {"id": "a1", "kind": "text", "role": "assistant", "content": "hi"}
                        ]}
                    ]
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(script.thread.as_deref(), Some("demo"));
        assert_eq!(script.turns[0].snapshots[1].delay_ms, 5);
        assert_eq!(script.turns[0].snapshots[1].snapshot.len(), 2);
    }

    #[test]
    fn test_script_file_rejects_garbage() {
        assert!(matches!(
            ScriptFile::from_json("not json"),
            Err(AgentError::Script(_))
        ));
    }

    #[test]
    fn test_with_delay_saturates() {
        let turn = TurnScript::new(vec![Snapshot::default()]).with_delay(Duration::from_millis(7));
        assert_eq!(turn.snapshots[0].delay_ms, 7);

        let turn = TurnScript::new(vec![Snapshot::default()]).with_delay(Duration::MAX);
        assert_eq!(turn.snapshots[0].delay_ms, u64::MAX);
    }
}
