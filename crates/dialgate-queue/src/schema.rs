//! Schema definitions for dialgate SurrealDB tables
//!
//! Tables:
//! - queues: Asserted queues and their sequence counters
//! - queue_messages: Pending messages (a row exists until acked)
//! - queue_consumers: Live consumers, one row per consumer tag

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// A pending message row (written by the send transaction)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessageRecord {
    /// Unique message ID (UUID string)
    pub message_id: String,
    /// Owning queue name
    pub queue: String,
    /// Position within the queue
    pub seq: u64,
    /// JSON text as published
    pub payload: String,
    #[serde(with = "surreal_datetime")]
    pub published_at: DateTime<Utc>,
}

/// A live consumer row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerRecord {
    pub tag: String,
    pub queue: String,
    /// Channel that opened the consumer
    pub channel_id: String,
    #[serde(with = "surreal_datetime")]
    pub registered_at: DateTime<Utc>,
}

impl ConsumerRecord {
    pub fn new(tag: String, queue: String, channel_id: String) -> Self {
        ConsumerRecord {
            tag,
            queue,
            channel_id,
            registered_at: Utc::now(),
        }
    }
}

/// Sequence counter row returned by the `queues` table
#[derive(Debug, Clone, Deserialize)]
pub struct QueueCounter {
    pub next_seq: u64,
}

/// `SELECT count() ... GROUP ALL` result row
#[derive(Debug, Clone, Deserialize)]
pub struct CountRow {
    pub count: usize,
}
