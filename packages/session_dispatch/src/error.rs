//! Error types for the dispatcher and its collaborators.

use crate::thread::ThreadId;

/// Errors surfaced to callers of the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Thread ids must contain at least one non-whitespace character
    #[error("invalid thread id: must not be empty")]
    InvalidThreadId,

    /// A second turn was submitted while one is already running for the thread
    #[error("a turn is already in progress for thread {thread}")]
    TurnInProgress { thread: ThreadId },

    /// The agent failed mid-turn; messages delivered before the failure stand
    #[error("agent failed on thread {thread}: {source}")]
    Agent {
        thread: ThreadId,
        #[source]
        source: AgentError,
    },
}

/// Failures raised by the agent collaborator while producing a turn.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("agent timed out")]
    Timeout,

    #[error("upstream error: {0}")]
    Upstream(String),

    /// Scripted agent misuse (no turn left, malformed script)
    #[error("script error: {0}")]
    Script(String),
}

/// Failure of a single sink delivery. Never escapes a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The receiving side has gone away (client disconnected)
    #[error("sink closed")]
    Closed,

    #[error("sink delivery timed out")]
    Timeout,

    #[error("sink failed: {0}")]
    Failed(String),

    #[error("sink panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    /// Whether this is a per-thread conflict the caller may retry later.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DispatchError::TurnInProgress { .. })
    }
}
