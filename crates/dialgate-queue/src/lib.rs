//! dialgate-queue: Durable Queues for dialgate
//!
//! This crate provides the queue layer that inbound telephony webhooks are
//! written to and that call-correlation races read from.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: at-most-once acknowledgement, filter-friendly consumption, and
//! explicit channel lifecycle.
//!
//! ## Key Components
//!
//! - `BrokerConnection`: Owns the publish/consume channels, reopens them lazily
//! - `QueueChannel` / `QueueConsumer`: Backend-agnostic queue operations
//! - `MemoryBroker`: In-process backend (tests, local development)
//! - `SurrealConnector`: SurrealDB-backed durable backend

pub mod connection;
mod error;
pub mod fakes;
mod migrations;
pub mod queue_traits;
mod schema;
pub mod surreal_queue;

pub use connection::{BrokerConfig, BrokerConnection};
pub use error::BrokerError;
pub use fakes::{MemoryBroker, MemoryChannel, MemoryConnector};
pub use queue_traits::{
    BrokerResult, ConsumerTag, Connector, Delivery, MessageId, QueueChannel, QueueConsumer,
    QueueName,
};
pub use surreal_queue::{SurrealConnector, SurrealQueueChannel};
