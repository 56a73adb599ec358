//! Output sinks registered by the transport layer.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::SinkError;
use crate::message::Message;

/// A consumer that accepts one message at a time.
///
/// The dispatcher never invokes a single subscription concurrently with
/// itself, so implementations do not need their own ordering guard.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(&self, message: &Message) -> Result<(), SinkError>;
}

/// Forwards messages into a bounded tokio channel owned by a connection.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Message>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving half.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl Sink for ChannelSink {
    async fn deliver(&self, message: &Message) -> Result<(), SinkError> {
        self.tx
            .send(message.clone())
            .await
            .map_err(|_| SinkError::Closed)
    }
}

/// Adapts a synchronous closure into a sink.
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F>
where
    F: Fn(&Message) -> Result<(), SinkError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn shared(f: F) -> Arc<dyn Sink> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F> Sink for FnSink<F>
where
    F: Fn(&Message) -> Result<(), SinkError> + Send + Sync + 'static,
{
    async fn deliver(&self, message: &Message) -> Result<(), SinkError> {
        (self.f)(message)
    }
}
