//! SurrealDB-backed durable queues
//!
//! Messages live in `queue_messages` until a consumer acks them (the ack
//! deletes the row, so only one caller can ever win it). A send bumps the
//! queue's counter and stores the row in one transaction, so rows become
//! visible in `seq` order and consumers can read forward from a cursor.
//! Consumers poll in batches and are woken early by sends made through the
//! same connector.
//!
//! Writes that lose an optimistic-transaction conflict are retried a bounded
//! number of times. Writes from one connector are serialized, so conflicts
//! only arise between processes sharing a database.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connection::BrokerConfig;
use crate::error::BrokerError;
use crate::migrations;
use crate::queue_traits::*;
use crate::schema::{ConsumerRecord, CountRow, QueueCounter, QueueMessageRecord};

/// Attempts per write before a conflict is reported.
const MAX_WRITE_ATTEMPTS: u32 = 8;

/// Rows fetched per consumer round trip.
const FETCH_BATCH: usize = 64;

type ConsumerFlags = Arc<Mutex<HashMap<ConsumerTag, Arc<AtomicBool>>>>;

fn flags(map: &ConsumerFlags) -> MutexGuard<'_, HashMap<ConsumerTag, Arc<AtomicBool>>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `write`, retrying transaction conflicts with a short linear backoff.
async fn with_conflict_retry<T, F, Fut>(op: &'static str, mut write: F) -> BrokerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BrokerResult<T>>,
{
    let mut attempt = 1;
    loop {
        match write().await {
            Err(e) if e.is_conflict() && attempt < MAX_WRITE_ATTEMPTS => {
                debug!(op, attempt, "write conflict, retrying");
                tokio::time::sleep(Duration::from_millis(5 * u64::from(attempt))).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// Liveness shared by a channel, its consumers and the connector that
/// opened it.
#[derive(Clone)]
struct Link {
    channel_id: String,
    open: Arc<AtomicBool>,
    client_stale: Arc<AtomicBool>,
    updates: Arc<watch::Sender<u64>>,
}

impl Link {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> BrokerResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BrokerError::ChannelClosed {
                channel: self.channel_id.clone(),
            })
        }
    }

    fn bump(&self) {
        self.updates.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Pass `result` through. A lost backend connection closes the channel
    /// and makes the connector reconnect on its next `open_channel`.
    fn observe<T>(&self, result: BrokerResult<T>) -> BrokerResult<T> {
        if let Err(e) = &result {
            if e.is_channel_failure() && self.open.swap(false, Ordering::SeqCst) {
                self.client_stale.store(true, Ordering::SeqCst);
                warn!(
                    channel = %self.channel_id,
                    error = %e,
                    "backend connection lost, channel closed"
                );
                self.bump();
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// SurrealConnector
// ---------------------------------------------------------------------------

/// Opens `SurrealQueueChannel`s over one lazily-established SurrealDB client.
pub struct SurrealConnector {
    config: BrokerConfig,
    db: tokio::sync::Mutex<Option<Surreal<Any>>>,
    /// Set by a channel that saw the connection fail; the cached client is
    /// dropped on the next `open_channel`.
    client_stale: Arc<AtomicBool>,
    connects: AtomicUsize,
    write_lock: Arc<tokio::sync::Mutex<()>>,
    updates: Arc<watch::Sender<u64>>,
}

impl SurrealConnector {
    pub fn new(config: BrokerConfig) -> Self {
        let (updates, _) = watch::channel(0);
        Self {
            config,
            db: tokio::sync::Mutex::new(None),
            client_stale: Arc::new(AtomicBool::new(false)),
            connects: AtomicUsize::new(0),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
            updates: Arc::new(updates),
        }
    }

    /// Connector over a private in-memory database, for tests.
    pub fn in_memory() -> Self {
        Self::new(BrokerConfig::new("mem://"))
    }

    /// Number of client connections established so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    async fn client(&self) -> BrokerResult<Surreal<Any>> {
        let mut slot = self.db.lock().await;
        if self.client_stale.swap(false, Ordering::SeqCst) && slot.take().is_some() {
            warn!(url = %self.config.url, "discarding failed SurrealDB client, reconnecting");
        }
        if let Some(db) = slot.as_ref() {
            return Ok(db.clone());
        }

        let db = surrealdb::engine::any::connect(&self.config.url)
            .await
            .map_err(|e| {
                BrokerError::Connection(format!("Failed to connect to {}: {}", self.config.url, e))
            })?;

        if let (Some(username), Some(password)) =
            (&self.config.username, &self.config.password)
        {
            db.signin(Root {
                username: username.as_str(),
                password: password.as_str(),
            })
            .await
            .map_err(|e| BrokerError::Connection(format!("Root auth failed: {e}")))?;
        }

        db.use_ns(&self.config.namespace)
            .use_db(&self.config.database)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        info!(url = %self.config.url, "SurrealDB queue backend connected");

        *slot = Some(db.clone());
        Ok(db)
    }

    async fn open(&self) -> BrokerResult<SurrealQueueChannel> {
        let db = self.client().await?;
        Ok(SurrealQueueChannel {
            link: Link {
                channel_id: format!("surreal-{}", uuid::Uuid::new_v4()),
                open: Arc::new(AtomicBool::new(true)),
                client_stale: Arc::clone(&self.client_stale),
                updates: Arc::clone(&self.updates),
            },
            db,
            poll_interval: self.config.poll_interval,
            consumers: Arc::new(Mutex::new(HashMap::new())),
            write_lock: Arc::clone(&self.write_lock),
        })
    }
}

#[async_trait]
impl Connector for SurrealConnector {
    async fn open_channel(&self) -> BrokerResult<Arc<dyn QueueChannel>> {
        Ok(Arc::new(self.open().await?))
    }

    fn describe(&self) -> String {
        self.config.url.clone()
    }
}

// ---------------------------------------------------------------------------
// SurrealQueueChannel
// ---------------------------------------------------------------------------

/// A logical channel over a shared SurrealDB client.
pub struct SurrealQueueChannel {
    link: Link,
    db: Surreal<Any>,
    poll_interval: Duration,
    consumers: ConsumerFlags,
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SurrealQueueChannel {
    async fn queue_exists(&self, queue: &QueueName) -> BrokerResult<bool> {
        let mut res = self
            .db
            .query("SELECT next_seq FROM type::thing('queues', $name)")
            .bind(("name", queue.as_str().to_string()))
            .await?;
        let rows: Vec<QueueCounter> = res.take(0)?;
        Ok(!rows.is_empty())
    }

    async fn count(&self, sql: &str, queue: &QueueName) -> BrokerResult<usize> {
        let mut res = self
            .db
            .query(sql)
            .bind(("queue", queue.as_str().to_string()))
            .await?;
        let rows: Vec<CountRow> = res.take(0)?;
        Ok(rows.first().map(|r| r.count).unwrap_or(0))
    }

    async fn create_queue(&self, queue: &QueueName) -> BrokerResult<()> {
        if self.queue_exists(queue).await? {
            return Ok(());
        }
        with_conflict_retry("assert_queue", move || async move {
            let _write = self.write_lock.lock().await;
            self.db
                .query(
                    "UPSERT type::thing('queues', $name) SET name = $name, next_seq = next_seq OR 0",
                )
                .bind(("name", queue.as_str().to_string()))
                .await?
                .check()?;
            Ok::<_, BrokerError>(())
        })
        .await
    }

    async fn append(&self, queue: &QueueName, text: &str) -> BrokerResult<MessageId> {
        if !self.queue_exists(queue).await? {
            return Err(BrokerError::QueueNotFound {
                queue: queue.to_string(),
            });
        }

        let id = MessageId::new();
        let mid = id.0.as_str();
        with_conflict_retry("send", move || async move {
            let _write = self.write_lock.lock().await;
            self.db
                .query(
                    "BEGIN TRANSACTION; \
                     LET $counter = (UPDATE type::thing('queues', $name) SET next_seq += 1 RETURN next_seq); \
                     CREATE queue_messages SET message_id = $mid, queue = $name, \
                         seq = $counter[0].next_seq, payload = $payload, published_at = time::now(); \
                     COMMIT TRANSACTION;",
                )
                .bind(("name", queue.as_str().to_string()))
                .bind(("mid", mid.to_string()))
                .bind(("payload", text.to_string()))
                .await?
                .check()?;
            Ok::<_, BrokerError>(())
        })
        .await?;

        debug!(channel = %self.link.channel_id, queue = %queue, message_id = %id, "message stored");
        self.link.bump();
        Ok(id)
    }

    async fn open_consumer(&self, queue: &QueueName) -> BrokerResult<Box<dyn QueueConsumer>> {
        if !self.queue_exists(queue).await? {
            return Err(BrokerError::QueueNotFound {
                queue: queue.to_string(),
            });
        }

        let tag = ConsumerTag::new();
        let record = ConsumerRecord::new(
            tag.0.clone(),
            queue.to_string(),
            self.link.channel_id.clone(),
        );
        let _created: Option<ConsumerRecord> =
            self.db.create("queue_consumers").content(record).await?;

        let live = Arc::new(AtomicBool::new(true));
        flags(&self.consumers).insert(tag.clone(), Arc::clone(&live));
        debug!(channel = %self.link.channel_id, queue = %queue, consumer = %tag, "consumer opened");

        Ok(Box::new(SurrealConsumer {
            tag,
            queue: queue.clone(),
            link: self.link.clone(),
            db: self.db.clone(),
            poll_interval: self.poll_interval,
            live,
            consumers: Arc::clone(&self.consumers),
            write_lock: Arc::clone(&self.write_lock),
            updates: self.link.updates.subscribe(),
            cursor: 0,
            buffered: VecDeque::new(),
        }))
    }

    async fn delete_consumers(&self, sql: &'static str, value: String) -> BrokerResult<()> {
        self.db
            .query(sql)
            .bind(("value", value))
            .await?
            .check()?;
        Ok(())
    }
}

#[async_trait]
impl QueueChannel for SurrealQueueChannel {
    fn id(&self) -> &str {
        &self.link.channel_id
    }

    fn is_open(&self) -> bool {
        self.link.is_open()
    }

    async fn assert_queue(&self, queue: &QueueName) -> BrokerResult<()> {
        self.link.ensure_open()?;
        let result = self.create_queue(queue).await;
        self.link.observe(result)
    }

    async fn send(&self, queue: &QueueName, payload: &[u8]) -> BrokerResult<MessageId> {
        self.link.ensure_open()?;
        let text = std::str::from_utf8(payload).map_err(|_| BrokerError::InvalidPayload)?;
        let result = self.append(queue, text).await;
        self.link.observe(result)
    }

    async fn consume(&self, queue: &QueueName) -> BrokerResult<Box<dyn QueueConsumer>> {
        self.link.ensure_open()?;
        let result = self.open_consumer(queue).await;
        self.link.observe(result)
    }

    async fn cancel(&self, tag: &ConsumerTag) -> BrokerResult<()> {
        if let Some(live) = flags(&self.consumers).remove(tag) {
            live.store(false, Ordering::SeqCst);
        }
        let result = self
            .delete_consumers("DELETE queue_consumers WHERE tag = $value", tag.0.clone())
            .await;
        self.link.observe(result)?;
        debug!(channel = %self.link.channel_id, consumer = %tag, "consumer canceled");
        self.link.bump();
        Ok(())
    }

    async fn consumer_count(&self, queue: &QueueName) -> BrokerResult<usize> {
        let result = self
            .count(
                "SELECT count() FROM queue_consumers WHERE queue = $queue GROUP ALL",
                queue,
            )
            .await;
        self.link.observe(result)
    }

    async fn pending_count(&self, queue: &QueueName) -> BrokerResult<usize> {
        let result = self
            .count(
                "SELECT count() FROM queue_messages WHERE queue = $queue GROUP ALL",
                queue,
            )
            .await;
        self.link.observe(result)
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.link.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        for (_, live) in flags(&self.consumers).drain() {
            live.store(false, Ordering::SeqCst);
        }
        self.link.bump();
        self.delete_consumers(
            "DELETE queue_consumers WHERE channel_id = $value",
            self.link.channel_id.clone(),
        )
        .await?;
        debug!(channel = %self.link.channel_id, "channel closed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SurrealConsumer
// ---------------------------------------------------------------------------

struct SurrealConsumer {
    tag: ConsumerTag,
    queue: QueueName,
    link: Link,
    db: Surreal<Any>,
    poll_interval: Duration,
    live: Arc<AtomicBool>,
    consumers: ConsumerFlags,
    write_lock: Arc<tokio::sync::Mutex<()>>,
    updates: watch::Receiver<u64>,
    /// Highest `seq` fetched so far.
    cursor: u64,
    buffered: VecDeque<Delivery>,
}

impl SurrealConsumer {
    fn ensure_live(&self) -> BrokerResult<()> {
        self.link.ensure_open()?;
        if !self.live.load(Ordering::SeqCst) {
            return Err(BrokerError::ConsumerCanceled {
                tag: self.tag.to_string(),
            });
        }
        Ok(())
    }

    async fn fill(&mut self) -> BrokerResult<()> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM queue_messages WHERE queue = $queue AND seq > $after \
                 ORDER BY seq ASC LIMIT $batch",
            )
            .bind(("queue", self.queue.as_str().to_string()))
            .bind(("after", self.cursor))
            .bind(("batch", FETCH_BATCH))
            .await?;
        let rows: Vec<QueueMessageRecord> = res.take(0)?;

        for row in rows {
            self.cursor = self.cursor.max(row.seq);
            self.buffered.push_back(Delivery {
                message_id: MessageId(row.message_id),
                queue: self.queue.clone(),
                seq: row.seq,
                payload: row.payload.into_bytes(),
                published_at: row.published_at,
            });
        }
        Ok(())
    }

    async fn fetch(&mut self) -> BrokerResult<Option<Delivery>> {
        self.ensure_live()?;
        if self.buffered.is_empty() {
            let result = self.fill().await;
            self.link.observe(result)?;
        }
        Ok(self.buffered.pop_front())
    }

    async fn remove(&self, message_id: &MessageId) -> BrokerResult<bool> {
        with_conflict_retry("ack", move || async move {
            let _write = self.write_lock.lock().await;
            let mut res = self
                .db
                .query("DELETE queue_messages WHERE message_id = $mid RETURN BEFORE")
                .bind(("mid", message_id.0.clone()))
                .await?;
            let removed: Vec<QueueMessageRecord> = res.take(0)?;
            Ok::<_, BrokerError>(!removed.is_empty())
        })
        .await
    }
}

#[async_trait]
impl QueueConsumer for SurrealConsumer {
    fn tag(&self) -> &ConsumerTag {
        &self.tag
    }

    fn queue(&self) -> &QueueName {
        &self.queue
    }

    async fn next(&mut self) -> BrokerResult<Delivery> {
        let poll_interval = self.poll_interval;
        loop {
            let _ = *self.updates.borrow_and_update();
            if let Some(delivery) = self.fetch().await? {
                return Ok(delivery);
            }
            tokio::select! {
                changed = self.updates.changed() => {
                    if changed.is_err() {
                        return Err(BrokerError::ChannelClosed {
                            channel: self.link.channel_id.clone(),
                        });
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    async fn try_next(&mut self) -> BrokerResult<Option<Delivery>> {
        self.fetch().await
    }

    async fn ack(&mut self, delivery: &Delivery) -> BrokerResult<bool> {
        self.link.ensure_open()?;
        let result = self.remove(&delivery.message_id).await;
        self.link.observe(result)
    }
}

impl Drop for SurrealConsumer {
    fn drop(&mut self) {
        if flags(&self.consumers).remove(&self.tag).is_none() {
            // Already canceled or closed through the channel.
            return;
        }
        self.live.store(false, Ordering::SeqCst);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(consumer = %self.tag, "dropped outside a runtime; consumer row left behind");
            return;
        };
        let db = self.db.clone();
        let tag = self.tag.0.clone();
        runtime.spawn(async move {
            if let Err(e) = db
                .query("DELETE queue_consumers WHERE tag = $tag")
                .bind(("tag", tag.clone()))
                .await
            {
                warn!(consumer = %tag, error = %e, "failed to remove dropped consumer");
            }
        });
    }
}
