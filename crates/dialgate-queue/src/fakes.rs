//! In-memory broker
//!
//! Provides `MemoryBroker`, `MemoryChannel` and `MemoryConnector` that satisfy
//! the queue trait contracts without any external dependencies. Used by the
//! test suites and by `memory://` broker URLs in local development.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use crate::error::BrokerError;
use crate::queue_traits::*;

// ---------------------------------------------------------------------------
// MemoryBroker
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StoredMessage {
    id: MessageId,
    seq: u64,
    payload: Vec<u8>,
    published_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<StoredMessage>,
    next_seq: u64,
    consumers: HashSet<ConsumerTag>,
}

/// Shared queue storage. Outlives every channel opened on it, so messages
/// survive a channel being closed and reopened.
#[derive(Debug)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<QueueName, QueueState>>,
    /// Bumped on every send, cancel and close so waiting consumers re-check.
    version: watch::Sender<u64>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            queues: Mutex::new(HashMap::new()),
            version,
        }
    }

    /// Open a new channel on this broker.
    pub fn channel(self: &Arc<Self>) -> MemoryChannel {
        MemoryChannel {
            id: format!("mem-{}", uuid::Uuid::new_v4()),
            broker: Arc::clone(self),
            open: Arc::new(AtomicBool::new(true)),
            owned: Mutex::new(Vec::new()),
        }
    }

    /// Raw payloads still pending on a queue, in delivery order.
    pub fn pending_payloads(&self, queue: &QueueName) -> Vec<Vec<u8>> {
        self.lock()
            .get(queue)
            .map(|q| q.pending.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Live consumers across every queue.
    pub fn total_consumers(&self) -> usize {
        self.lock().values().map(|q| q.consumers.len()).sum()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueueName, QueueState>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// MemoryChannel
// ---------------------------------------------------------------------------

/// A logical channel over a shared `MemoryBroker`.
#[derive(Debug)]
pub struct MemoryChannel {
    id: String,
    broker: Arc<MemoryBroker>,
    open: Arc<AtomicBool>,
    owned: Mutex<Vec<(QueueName, ConsumerTag)>>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> BrokerResult<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed {
                channel: self.id.clone(),
            })
        }
    }

    fn owned(&self) -> MutexGuard<'_, Vec<(QueueName, ConsumerTag)>> {
        self.owned.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl QueueChannel for MemoryChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn assert_queue(&self, queue: &QueueName) -> BrokerResult<()> {
        self.ensure_open()?;
        self.broker.lock().entry(queue.clone()).or_default();
        Ok(())
    }

    async fn send(&self, queue: &QueueName, payload: &[u8]) -> BrokerResult<MessageId> {
        self.ensure_open()?;
        let id = MessageId::new();
        {
            let mut queues = self.broker.lock();
            let state = queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::QueueNotFound {
                    queue: queue.to_string(),
                })?;
            state.next_seq += 1;
            state.pending.push(StoredMessage {
                id: id.clone(),
                seq: state.next_seq,
                payload: payload.to_vec(),
                published_at: Utc::now(),
            });
        }
        self.broker.bump();
        Ok(id)
    }

    async fn consume(&self, queue: &QueueName) -> BrokerResult<Box<dyn QueueConsumer>> {
        self.ensure_open()?;
        let tag = ConsumerTag::new();
        {
            let mut queues = self.broker.lock();
            let state = queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::QueueNotFound {
                    queue: queue.to_string(),
                })?;
            state.consumers.insert(tag.clone());
        }
        self.owned().push((queue.clone(), tag.clone()));
        debug!(channel = %self.id, queue = %queue, consumer = %tag, "consumer opened");

        Ok(Box::new(MemoryConsumer {
            tag,
            queue: queue.clone(),
            channel_id: self.id.clone(),
            channel_open: Arc::clone(&self.open),
            broker: Arc::clone(&self.broker),
            updates: self.broker.version.subscribe(),
            cursor: 0,
        }))
    }

    async fn cancel(&self, tag: &ConsumerTag) -> BrokerResult<()> {
        let queue = {
            let mut owned = self.owned();
            let position = owned.iter().position(|(_, t)| t == tag);
            position.map(|i| owned.remove(i).0)
        };
        if let Some(queue) = queue {
            if let Some(state) = self.broker.lock().get_mut(&queue) {
                state.consumers.remove(tag);
            }
            debug!(channel = %self.id, queue = %queue, consumer = %tag, "consumer canceled");
            self.broker.bump();
        }
        Ok(())
    }

    async fn consumer_count(&self, queue: &QueueName) -> BrokerResult<usize> {
        Ok(self
            .broker
            .lock()
            .get(queue)
            .map(|q| q.consumers.len())
            .unwrap_or(0))
    }

    async fn pending_count(&self, queue: &QueueName) -> BrokerResult<usize> {
        Ok(self
            .broker
            .lock()
            .get(queue)
            .map(|q| q.pending.len())
            .unwrap_or(0))
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let owned: Vec<_> = self.owned().drain(..).collect();
        {
            let mut queues = self.broker.lock();
            for (queue, tag) in &owned {
                if let Some(state) = queues.get_mut(queue) {
                    state.consumers.remove(tag);
                }
            }
        }
        debug!(channel = %self.id, consumers = owned.len(), "channel closed");
        self.broker.bump();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryConsumer
// ---------------------------------------------------------------------------

struct MemoryConsumer {
    tag: ConsumerTag,
    queue: QueueName,
    channel_id: String,
    channel_open: Arc<AtomicBool>,
    broker: Arc<MemoryBroker>,
    updates: watch::Receiver<u64>,
    /// Highest seq already handed to this consumer
    cursor: u64,
}

impl MemoryConsumer {
    fn poll(&mut self) -> BrokerResult<Option<Delivery>> {
        if !self.channel_open.load(Ordering::SeqCst) {
            return Err(BrokerError::ChannelClosed {
                channel: self.channel_id.clone(),
            });
        }
        let queues = self.broker.lock();
        let state = queues
            .get(&self.queue)
            .ok_or_else(|| BrokerError::QueueNotFound {
                queue: self.queue.to_string(),
            })?;
        if !state.consumers.contains(&self.tag) {
            return Err(BrokerError::ConsumerCanceled {
                tag: self.tag.to_string(),
            });
        }
        let delivery = state
            .pending
            .iter()
            .find(|m| m.seq > self.cursor)
            .map(|m| Delivery {
                message_id: m.id.clone(),
                queue: self.queue.clone(),
                seq: m.seq,
                payload: m.payload.clone(),
                published_at: m.published_at,
            });
        drop(queues);

        if let Some(d) = &delivery {
            self.cursor = d.seq;
        }
        Ok(delivery)
    }
}

#[async_trait]
impl QueueConsumer for MemoryConsumer {
    fn tag(&self) -> &ConsumerTag {
        &self.tag
    }

    fn queue(&self) -> &QueueName {
        &self.queue
    }

    async fn next(&mut self) -> BrokerResult<Delivery> {
        loop {
            // Mark the current version seen before looking, so a send that
            // lands after the check still wakes us.
            let _ = *self.updates.borrow_and_update();
            if let Some(delivery) = self.poll()? {
                return Ok(delivery);
            }
            if self.updates.changed().await.is_err() {
                return Err(BrokerError::ChannelClosed {
                    channel: self.channel_id.clone(),
                });
            }
        }
    }

    async fn try_next(&mut self) -> BrokerResult<Option<Delivery>> {
        self.poll()
    }

    async fn ack(&mut self, delivery: &Delivery) -> BrokerResult<bool> {
        if !self.channel_open.load(Ordering::SeqCst) {
            return Err(BrokerError::ChannelClosed {
                channel: self.channel_id.clone(),
            });
        }
        let mut queues = self.broker.lock();
        let Some(state) = queues.get_mut(&delivery.queue) else {
            return Ok(false);
        };
        match state
            .pending
            .iter()
            .position(|m| m.id == delivery.message_id)
        {
            Some(i) => {
                state.pending.remove(i);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        if let Some(state) = self.broker.lock().get_mut(&self.queue) {
            state.consumers.remove(&self.tag);
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryConnector
// ---------------------------------------------------------------------------

/// Opens `MemoryChannel`s over one shared broker and counts them.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    broker: Arc<MemoryBroker>,
    opened: AtomicUsize,
}

impl MemoryConnector {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self {
            broker,
            opened: AtomicUsize::new(0),
        }
    }

    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }

    /// Channels opened so far, including reconnects.
    pub fn channels_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open_channel(&self) -> BrokerResult<Arc<dyn QueueChannel>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.broker.channel()))
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(name: &str) -> QueueName {
        QueueName::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_consumer_sees_each_message_once() {
        let broker = Arc::new(MemoryBroker::new());
        let channel = broker.channel();
        let q = queue("voice/amd");
        channel.assert_queue(&q).await.unwrap();
        channel.send(&q, b"one").await.unwrap();

        let mut consumer = channel.consume(&q).await.unwrap();
        let first = consumer.next().await.unwrap();
        assert_eq!(first.payload, b"one");
        assert!(consumer.try_next().await.unwrap().is_none());

        // Not acked, so still pending for everyone else.
        assert_eq!(channel.pending_count(&q).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_waiting_consumer_wakes_on_send() {
        let broker = Arc::new(MemoryBroker::new());
        let channel = Arc::new(broker.channel());
        let q = queue("voice/status");
        channel.assert_queue(&q).await.unwrap();

        let mut consumer = channel.consume(&q).await.unwrap();
        let waiter = tokio::spawn(async move { consumer.next().await });

        tokio::task::yield_now().await;
        channel.send(&q, b"late").await.unwrap();

        let delivery = waiter.await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"late");
    }

    #[tokio::test]
    async fn test_drop_deregisters_consumer() {
        let broker = Arc::new(MemoryBroker::new());
        let channel = broker.channel();
        let q = queue("voice/amd");
        channel.assert_queue(&q).await.unwrap();

        let consumer = channel.consume(&q).await.unwrap();
        assert_eq!(broker.total_consumers(), 1);
        drop(consumer);
        assert_eq!(broker.total_consumers(), 0);
    }

    #[tokio::test]
    async fn test_connector_counts_channels() {
        let connector = MemoryConnector::default();
        connector.open_channel().await.unwrap();
        connector.open_channel().await.unwrap();
        assert_eq!(connector.channels_opened(), 2);
    }
}
