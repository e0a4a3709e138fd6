//! Error types for dialgate-queue

use thiserror::Error;

/// Errors that can occur while talking to the queue broker
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Could not open the underlying connection
    #[error("Broker connection failed: {0}")]
    Connection(String),

    /// The channel was closed (explicitly or because the connection dropped)
    #[error("Channel {channel} is closed")]
    ChannelClosed { channel: String },

    /// The connection object was shut down and will not reconnect
    #[error("Broker connection has been shut down")]
    ShutDown,

    /// Send or consume against a queue that was never asserted
    #[error("Queue not found: {queue}")]
    QueueNotFound { queue: String },

    /// Queue names must be non-empty and free of whitespace
    #[error("Invalid queue name: {0:?}")]
    InvalidQueueName(String),

    /// The consumer was canceled while waiting for a delivery
    #[error("Consumer {tag} was canceled")]
    ConsumerCanceled { tag: String },

    /// Payloads are stored as UTF-8 JSON text
    #[error("Payload is not valid UTF-8 text")]
    InvalidPayload,

    /// A write lost an optimistic transaction conflict and may be retried
    #[error("Broker write conflict: {0}")]
    Conflict(String),

    /// Backend query error
    #[error("Broker backend error: {0}")]
    Backend(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl BrokerError {
    /// Whether this error means the channel is gone and must be reopened.
    pub fn is_channel_failure(&self) -> bool {
        matches!(
            self,
            BrokerError::ChannelClosed { .. } | BrokerError::Connection(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BrokerError::Conflict(_))
    }
}

impl From<surrealdb::Error> for BrokerError {
    fn from(err: surrealdb::Error) -> Self {
        use surrealdb::error::Api;

        let message = err.to_string();
        match err {
            surrealdb::Error::Api(Api::Ws(_) | Api::Http(_) | Api::ConnectionUninitialised) => {
                BrokerError::Connection(message)
            }
            _ if message.contains("can be retried") => BrokerError::Conflict(message),
            _ => BrokerError::Backend(message),
        }
    }
}
