//! Lazily connected log sink shared by every request

use crate::config::PublisherConfig;
use crate::error::{PublishError, Result};
use crate::PLUGIN_NAME;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub mod memory;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use memory::{BrokerMessage, MemoryBroker};

/// Opens connections to a log sink
#[async_trait]
pub trait Connector: Send + Sync {
    /// Dial the sink described by `config`
    async fn connect(&self, config: &PublisherConfig) -> Result<Box<dyn Connection>>;
}

/// An established connection to a log sink
///
/// Connections are never used concurrently; the publisher serializes access.
#[async_trait]
pub trait Connection: Send {
    /// Send one message
    async fn send(&mut self, payload: Bytes) -> Result<()>;

    /// Release the connection
    async fn close(&mut self) -> Result<()>;
}

/// Observable lifecycle state of a [`Publisher`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublisherState {
    /// Not dialed yet
    Idle,
    /// Holding a live connection
    Connected,
    /// The dial failed; no further dial is attempted
    Unavailable,
    /// Closed by shutdown
    Closed,
}

enum Slot {
    Idle,
    Connected(Box<dyn Connection>),
    Unavailable,
    Closed,
}

impl Slot {
    fn state(&self) -> PublisherState {
        match self {
            Slot::Idle => PublisherState::Idle,
            Slot::Connected(_) => PublisherState::Connected,
            Slot::Unavailable => PublisherState::Unavailable,
            Slot::Closed => PublisherState::Closed,
        }
    }
}

/// Lazily connected, shared log sink
///
/// A single mutex guards dialing, publishing and closing. Under any number
/// of concurrent callers the connector is dialed at most once, and a failed
/// dial leaves the publisher unavailable for the rest of its lifetime.
pub struct Publisher {
    config: PublisherConfig,
    connector: Arc<dyn Connector>,
    slot: Mutex<Slot>,
    dials: AtomicUsize,
}

impl Publisher {
    /// Create a publisher; no connection is made until the first publish
    pub fn new(config: PublisherConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            slot: Mutex::new(Slot::Idle),
            dials: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// Number of dials attempted so far
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> PublisherState {
        self.slot.lock().await.state()
    }

    /// Make sure a connection exists, dialing it if this is the first use
    pub async fn get_or_create(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        self.ensure_connected(&mut slot).await.map(|_| ())
    }

    /// Send one message, connecting first if needed
    ///
    /// Errors are returned to the caller and never retried.
    pub async fn publish(&self, payload: Bytes) -> Result<()> {
        let mut slot = self.slot.lock().await;
        let connection = self.ensure_connected(&mut slot).await?;
        with_deadline(self.config.timeout, connection.send(payload)).await
    }

    /// Release the connection
    ///
    /// Idempotent. Any later publish fails with [`PublishError::Closed`].
    pub async fn close(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        match std::mem::replace(&mut *slot, Slot::Closed) {
            Slot::Connected(mut connection) => {
                tracing::info!(plugin = PLUGIN_NAME, topic = %self.config.topic, "closing broker connection");
                connection.close().await
            }
            _ => Ok(()),
        }
    }

    async fn ensure_connected<'a>(&self, slot: &'a mut Slot) -> Result<&'a mut Box<dyn Connection>> {
        match slot {
            Slot::Unavailable => return Err(PublishError::Unavailable),
            Slot::Closed => return Err(PublishError::Closed),
            Slot::Idle => match self.dial().await {
                Ok(connection) => *slot = Slot::Connected(connection),
                Err(err) => {
                    tracing::error!(
                        plugin = PLUGIN_NAME,
                        error = %err,
                        brokers = ?self.config.brokers,
                        topic = %self.config.topic,
                        "[PLUGIN: {}] failed to connect to broker, publishing disabled",
                        PLUGIN_NAME
                    );
                    *slot = Slot::Unavailable;
                    return Err(err);
                }
            },
            Slot::Connected(_) => {}
        }

        match slot {
            Slot::Connected(connection) => Ok(connection),
            _ => Err(PublishError::Unavailable),
        }
    }

    async fn dial(&self) -> Result<Box<dyn Connection>> {
        if self.config.brokers.is_empty() {
            return Err(PublishError::NoBrokers);
        }
        self.dials.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            plugin = PLUGIN_NAME,
            brokers = ?self.config.brokers,
            topic = %self.config.topic,
            partition = self.config.partition,
            "dialing broker"
        );
        with_deadline(self.config.timeout, self.connector.connect(&self.config))
            .await
            .map_err(|err| match err {
                PublishError::Timeout(deadline) => {
                    PublishError::Dial(format!("timed out after {deadline:?}"))
                }
                other => other,
            })
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("config", &self.config)
            .field("dials", &self.dial_count())
            .finish_non_exhaustive()
    }
}

async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| PublishError::Timeout(deadline))?
}
