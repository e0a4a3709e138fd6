//! Queue trait definitions for dialgate
//!
//! These traits define the broker abstractions the rest of the system uses:
//! - `QueueChannel`: one logical channel (assert, send, consume, cancel)
//! - `QueueConsumer`: one open consumer on one queue
//! - `Connector`: opens fresh channels, used by `BrokerConnection` to reconnect
//!
//! Consumption is filter-friendly: a consumer sees every pending message once,
//! and a message it does not ack stays pending for every other reader.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

/// Result type for broker operations
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Name of a durable queue (e.g. `voice/amd`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Validate and wrap a queue name.
    pub fn new(name: impl Into<String>) -> BrokerResult<Self> {
        let name = name.into();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(BrokerError::InvalidQueueName(name));
        }
        Ok(QueueName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a queued message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new random MessageId
    pub fn new() -> Self {
        MessageId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broker-side identity of an open consumer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerTag(pub String);

impl ConsumerTag {
    pub fn new() -> Self {
        ConsumerTag(format!("ctag-{}", uuid::Uuid::new_v4()))
    }
}

impl Default for ConsumerTag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pending message handed to a consumer.
///
/// Receiving a delivery does not claim it; only a successful `ack` does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: MessageId,
    pub queue: QueueName,
    /// Monotonic position within the queue
    pub seq: u64,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

/// One logical broker channel.
///
/// Guarantees:
/// - `assert_queue` is idempotent and never discards existing messages.
/// - Messages in one queue are delivered in `send` order.
/// - A message is removed only by a successful `ack`.
/// - After `cancel(tag)` the consumer receives no further deliveries and
///   no longer counts towards `consumer_count`.
#[async_trait]
pub trait QueueChannel: Send + Sync {
    /// Identifier used in logs and errors.
    fn id(&self) -> &str;

    /// Whether the channel can still be used.
    fn is_open(&self) -> bool;

    /// Create the queue if it does not exist yet.
    async fn assert_queue(&self, queue: &QueueName) -> BrokerResult<()>;

    /// Append a payload to an asserted queue.
    async fn send(&self, queue: &QueueName, payload: &[u8]) -> BrokerResult<MessageId>;

    /// Open a consumer on an asserted queue.
    async fn consume(&self, queue: &QueueName) -> BrokerResult<Box<dyn QueueConsumer>>;

    /// Cancel a consumer opened on this channel. No-op if unknown.
    async fn cancel(&self, tag: &ConsumerTag) -> BrokerResult<()>;

    /// Number of live consumers on a queue.
    async fn consumer_count(&self, queue: &QueueName) -> BrokerResult<usize>;

    /// Number of pending (unacknowledged) messages on a queue.
    async fn pending_count(&self, queue: &QueueName) -> BrokerResult<usize>;

    /// Close the channel, failing every consumer still waiting on it.
    async fn close(&self) -> BrokerResult<()>;
}

/// An open consumer bound to a single queue.
#[async_trait]
pub trait QueueConsumer: Send {
    fn tag(&self) -> &ConsumerTag;

    fn queue(&self) -> &QueueName;

    /// Wait for the next pending message this consumer has not inspected yet.
    ///
    /// Fails with `ConsumerCanceled` or `ChannelClosed` instead of hanging
    /// once the consumer or its channel goes away.
    async fn next(&mut self) -> BrokerResult<Delivery>;

    /// Like `next`, but returns `None` instead of waiting.
    async fn try_next(&mut self) -> BrokerResult<Option<Delivery>>;

    /// Acknowledge a delivery. Returns `true` only for the caller that moved
    /// the message out of the pending state.
    async fn ack(&mut self, delivery: &Delivery) -> BrokerResult<bool>;
}

/// Opens channels on demand.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open_channel(&self) -> BrokerResult<Arc<dyn QueueChannel>>;

    /// Human-readable target, without credentials.
    fn describe(&self) -> String;
}
