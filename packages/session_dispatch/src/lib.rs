//! Session Dispatch - multi-conversation streaming dispatcher
//!
//! Sits between an external streaming agent and any number of client
//! connections. Each conversation (thread) has its own ordered list of
//! subscribed sinks; every message the agent produces for a thread is
//! delivered once to each sink subscribed at that moment.
//!
//! The agent yields cumulative snapshots, so the dispatcher keeps a
//! per-thread seen-set and only forwards messages it has not delivered yet.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use session_dispatch::{
//!     Message, Role, ScriptedAgent, SessionDispatcher, Snapshot, ThreadId, TurnScript,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let agent = ScriptedAgent::with_turns([TurnScript::new(vec![Snapshot::new(vec![
//!         Message::text("a1", Role::Assistant, "hi"),
//!     ])])]);
//!     let dispatcher = SessionDispatcher::new(Arc::new(agent));
//!     let thread = ThreadId::new("t1").unwrap();
//!
//!     // Transport layer: one subscription per connected client
//!     let (handle, mut rx) = dispatcher.subscribe_channel(&thread).await;
//!
//!     // Inbound message handler
//!     dispatcher.submit(&thread, "hello").await.unwrap();
//!
//!     while let Ok(message) = rx.try_recv() {
//!         println!("{}: {:?}", message.id, message.content());
//!     }
//!     dispatcher.unsubscribe(&thread, handle).await;
//! }
//! ```

pub mod agent;
pub mod config;
mod dedup;
mod dispatcher;
mod error;
pub mod message;
pub mod metrics;
mod registry;
pub mod script;
pub mod sink;
mod thread;

pub use agent::{Agent, SnapshotStream};
pub use config::{DispatcherConfig, SubmitPolicy};
pub use dedup::{Admitted, SeenSet};
pub use dispatcher::{SessionDispatcher, TurnSummary};
pub use error::{AgentError, DispatchError, SinkError};
pub use message::{Message, MessageId, Payload, Role, Snapshot};
pub use metrics::MetricsSnapshot;
pub use registry::{SubscriptionHandle, ThreadInfo};
pub use script::{ScriptFile, ScriptedAgent, TurnScript};
pub use sink::{ChannelSink, FnSink, Sink};
pub use thread::ThreadId;
