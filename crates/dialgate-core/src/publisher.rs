//! Event publisher: appends validated call events to their durable queue.

use std::sync::Arc;

use dialgate_queue::{BrokerConnection, BrokerError, MessageId, QueueName};
use tracing::{debug, instrument};

use crate::events::CallEvent;

/// Writes call events to `voice/amd` or `voice/status`.
#[derive(Clone)]
pub struct EventPublisher {
    connection: Arc<BrokerConnection>,
}

impl EventPublisher {
    pub fn new(connection: Arc<BrokerConnection>) -> Self {
        Self { connection }
    }

    /// Assert the event's queue, then append its JSON payload.
    #[instrument(skip(self, event), fields(call_id = %event.call_id(), kind = ?event.kind()))]
    pub async fn publish(&self, event: &CallEvent) -> Result<MessageId, BrokerError> {
        let queue = QueueName::new(event.kind().queue())?;
        let payload = event
            .encode()
            .map_err(|_| BrokerError::InvalidPayload)?;

        let channel = self.connection.publish_channel().await?;
        channel.assert_queue(&queue).await?;
        let message_id = channel.send(&queue, &payload).await?;
        debug!(queue = %queue, message_id = %message_id, "event published");
        Ok(message_id)
    }
}
