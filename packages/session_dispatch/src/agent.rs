//! The streaming agent collaborator.
//!
//! The dispatcher knows nothing about models, tools or prompts. All it needs
//! from an agent is a lazy stream of cumulative snapshots for one turn.

use futures::stream::BoxStream;

use crate::error::AgentError;
use crate::message::Snapshot;
use crate::thread::ThreadId;

/// Stream of cumulative snapshots for a single turn. An `Err` item aborts the turn.
pub type SnapshotStream = BoxStream<'static, Result<Snapshot, AgentError>>;

/// External conversational agent.
///
/// The agent owns the conversation history for each thread; the dispatcher
/// only passes the thread id and the new user text.
pub trait Agent: Send + Sync {
    fn invoke_turn(&self, thread: &ThreadId, user_text: &str) -> SnapshotStream;
}

impl<A: Agent + ?Sized> Agent for std::sync::Arc<A> {
    fn invoke_turn(&self, thread: &ThreadId, user_text: &str) -> SnapshotStream {
        (**self).invoke_turn(thread, user_text)
    }
}
