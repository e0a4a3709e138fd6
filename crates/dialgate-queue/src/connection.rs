//! Broker connection - channel lifecycle
//!
//! `BrokerConnection` is built once at startup and shared by `Arc` between
//! the publisher and the race engine. It holds one publish channel and one
//! consume channel. Either is reopened on demand when it is observed closed,
//! so a dropped channel costs the in-flight work on it but not the process.
//! `close` tears both down for shutdown; afterwards nothing reconnects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::error::BrokerError;
use crate::fakes::{MemoryBroker, MemoryConnector};
use crate::queue_traits::{BrokerResult, Connector, QueueChannel};
use crate::surreal_queue::SurrealConnector;

/// Configuration for the queue backend
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// `memory://`, `mem://`, `surrealkv://path`, `ws://host:port`, ...
    pub url: String,
    /// Namespace (default: "dialgate")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Root username, if the backend requires auth
    pub username: Option<String>,
    pub password: Option<String>,
    /// How often a waiting consumer re-checks the backend
    pub poll_interval: Duration,
}

impl BrokerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            namespace: "dialgate".to_string(),
            database: "main".to_string(),
            username: None,
            password: None,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Set root credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - BROKER_URL (optional, default: "memory://")
    /// - SURREALDB_NAMESPACE (optional, default: "dialgate")
    /// - SURREALDB_DATABASE (optional, default: "main")
    /// - SURREALDB_USERNAME / SURREALDB_PASSWORD (optional, both or neither)
    /// - BROKER_POLL_INTERVAL_MS (optional, default: 100)
    pub fn from_env() -> Self {
        let mut config =
            Self::new(std::env::var("BROKER_URL").unwrap_or_else(|_| "memory://".to_string()));
        if let Ok(ns) = std::env::var("SURREALDB_NAMESPACE") {
            config.namespace = ns;
        }
        if let Ok(db) = std::env::var("SURREALDB_DATABASE") {
            config.database = db;
        }
        if let (Ok(user), Ok(pass)) = (
            std::env::var("SURREALDB_USERNAME"),
            std::env::var("SURREALDB_PASSWORD"),
        ) {
            config = config.with_credentials(user, pass);
        }
        if let Some(ms) = std::env::var("BROKER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.poll_interval = Duration::from_millis(ms);
        }
        config
    }

    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory://")
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new("memory://")
    }
}

/// Process-wide broker connection with lazily reopened channels.
pub struct BrokerConnection {
    connector: Arc<dyn Connector>,
    publish: Mutex<Option<Arc<dyn QueueChannel>>>,
    consume: Mutex<Option<Arc<dyn QueueChannel>>>,
    shut_down: AtomicBool,
}

impl BrokerConnection {
    /// Open both channels eagerly so startup fails fast on a bad backend.
    #[instrument(skip(connector), fields(backend = %connector.describe()))]
    pub async fn open(connector: Arc<dyn Connector>) -> BrokerResult<Self> {
        let publish = connector.open_channel().await?;
        let consume = connector.open_channel().await?;
        info!("Broker connection established");
        Ok(Self {
            connector,
            publish: Mutex::new(Some(publish)),
            consume: Mutex::new(Some(consume)),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Build the connector described by `config` and open it.
    pub async fn from_config(config: &BrokerConfig) -> BrokerResult<Self> {
        let connector: Arc<dyn Connector> = if config.is_memory() {
            Arc::new(MemoryConnector::new(Arc::new(MemoryBroker::new())))
        } else {
            Arc::new(SurrealConnector::new(config.clone()))
        };
        Self::open(connector).await
    }

    /// Channel used by the event publisher.
    pub async fn publish_channel(&self) -> BrokerResult<Arc<dyn QueueChannel>> {
        self.ensure(&self.publish, "publish").await
    }

    /// Channel used by race consumers.
    pub async fn consume_channel(&self) -> BrokerResult<Arc<dyn QueueChannel>> {
        self.ensure(&self.consume, "consume").await
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    async fn ensure(
        &self,
        slot: &Mutex<Option<Arc<dyn QueueChannel>>>,
        role: &'static str,
    ) -> BrokerResult<Arc<dyn QueueChannel>> {
        if self.is_shut_down() {
            return Err(BrokerError::ShutDown);
        }
        let mut slot = slot.lock().await;
        if let Some(channel) = slot.as_ref() {
            if channel.is_open() {
                return Ok(Arc::clone(channel));
            }
            warn!(role, channel = channel.id(), "channel closed, reopening");
        }
        let channel = self.connector.open_channel().await?;
        info!(role, channel = channel.id(), "channel opened");
        *slot = Some(Arc::clone(&channel));
        Ok(channel)
    }

    /// Close both channels. Later channel requests fail with `ShutDown`.
    pub async fn close(&self) -> BrokerResult<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        for slot in [&self.publish, &self.consume] {
            if let Some(channel) = slot.lock().await.take() {
                channel.close().await?;
            }
        }
        info!("Broker connection closed");
        Ok(())
    }
}
