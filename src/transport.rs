//! Message transport contract
//!
//! The coordinator needs two things from a queue: a competing-consumers
//! worker per routing key, and a sender that delivers to whichever worker
//! is currently registered for a key. Payloads are opaque bytes.

use crate::TransportError;
use async_trait::async_trait;
use std::sync::Arc;

/// Receives messages delivered to a worker
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one payload. An error is reported back to an awaiting sender.
    async fn handle(&self, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// A registered competing consumer
#[async_trait]
pub trait Worker: Send + Sync {
    /// Take the worker off its routing key without waiting. Messages sent
    /// afterwards go to other workers; an in-flight handler call continues.
    fn deregister(&self);

    /// Deregister, wait for the in-flight handler call, and release
    /// anything still queued for this worker.
    async fn stop(&self) -> Result<(), TransportError>;
}

/// Sends messages to a routing key
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Send one payload to the routing key
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// Sender delivery options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SenderOptions {
    /// Resolve `send` on transport acceptance instead of handler completion
    pub fire_and_forget: bool,
}

impl SenderOptions {
    /// `send` returns once the transport accepted the message
    pub fn fire_and_forget() -> Self {
        Self {
            fire_and_forget: true,
        }
    }

    /// `send` returns the handler's result
    pub fn await_handler() -> Self {
        Self {
            fire_and_forget: false,
        }
    }
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self::fire_and_forget()
    }
}

/// Competing-consumers message queue
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Register a handler; each message for `routing_key` goes to exactly
    /// one registered worker.
    async fn create_worker(
        &self,
        routing_key: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Box<dyn Worker>, TransportError>;

    /// Sender for `routing_key`
    async fn create_sender(
        &self,
        routing_key: &str,
        options: SenderOptions,
    ) -> Result<Arc<dyn MessageSender>, TransportError>;
}
