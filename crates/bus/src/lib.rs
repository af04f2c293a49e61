//! mdindex bus: the narrow view of the message substrate the indexer consumes.
//!
//! Delivery is at-least-once and durable: a message stays pending on its durable
//! subscription until acknowledged, and is redelivered after a resubscribe.

#![forbid(unsafe_code)]

pub mod mem;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use mem::MemStreamer;

#[derive(Debug, Clone, Error)]
pub enum SubscriptionError {
    #[error("durable {durable} on {topic} already has an active subscriber")]
    AlreadySubscribed { topic: String, durable: String },
    #[error("subscription closed")]
    Closed,
    #[error("ack failed: {0}")]
    Ack(String),
    #[error("transport: {0}")]
    Transport(String),
}

/// One delivered message.
#[async_trait]
pub trait Message: Send + Sync {
    fn payload(&self) -> &[u8];
    async fn ack(&self) -> Result<(), SubscriptionError>;
}

pub type BoxMessage = Box<dyn Message>;

/// A durable consumer position on a topic.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message. `None` once the substrate is gone.
    /// Must be cancel-safe: dropping the future never loses a message.
    async fn next(&mut self) -> Option<BoxMessage>;

    /// Release the durable position; unacked messages stay pending.
    async fn close(self: Box<Self>) -> Result<(), SubscriptionError>;
}

#[async_trait]
pub trait Streamer: Send + Sync {
    async fn persistent_subscribe(
        &self,
        topic: &str,
        durable_name: &str,
    ) -> Result<Box<dyn Subscription>, SubscriptionError>;

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), SubscriptionError>;
}
