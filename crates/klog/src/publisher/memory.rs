use super::{Connection, Connector};
use crate::config::PublisherConfig;
use crate::error::{PublishError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// A message accepted by the in-memory broker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub partition: i32,
    pub payload: Bytes,
}

#[derive(Debug, Default)]
struct Inner {
    messages: Mutex<Vec<BrokerMessage>>,
    latency: Mutex<Option<Duration>>,
    dials: AtomicUsize,
    closes: AtomicUsize,
    fail_dials: AtomicBool,
    fail_sends: AtomicBool,
    arrived: Notify,
}

/// In-process log sink (for development and tests)
///
/// Clones share the same message log, so a test can keep one handle while
/// the publisher owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages received so far, in arrival order
    pub fn messages(&self) -> Vec<BrokerMessage> {
        self.inner
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn dial_count(&self) -> usize {
        self.inner.dials.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    /// Make the next dials fail
    pub fn fail_dials(&self, fail: bool) {
        self.inner.fail_dials.store(fail, Ordering::SeqCst);
    }

    /// Make sends on open connections fail
    pub fn fail_sends(&self, fail: bool) {
        self.inner.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Delay every dial and send by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self
            .inner
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(latency);
    }

    /// Wait until at least `count` messages arrived or `timeout` elapsed
    ///
    /// Returns whatever was received by then.
    pub async fn wait_for_messages(&self, count: usize, timeout: Duration) -> Vec<BrokerMessage> {
        let wait = async {
            loop {
                let arrived = self.inner.arrived.notified();
                tokio::pin!(arrived);
                arrived.as_mut().enable();
                if self.messages().len() >= count {
                    return;
                }
                arrived.await;
            }
        };
        let _ = tokio::time::timeout(timeout, wait).await;
        self.messages()
    }

    async fn delay(&self) {
        let latency = *self
            .inner
            .latency
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, config: &PublisherConfig) -> Result<Box<dyn Connection>> {
        self.inner.dials.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.inner.fail_dials.load(Ordering::SeqCst) {
            return Err(PublishError::Dial(format!(
                "connection refused by {}",
                config.brokers.join(",")
            )));
        }
        Ok(Box::new(MemoryConnection {
            broker: self.clone(),
            topic: config.topic.clone(),
            partition: config.partition,
        }))
    }
}

/// Connection handed out by [`MemoryBroker`]
#[derive(Debug)]
pub struct MemoryConnection {
    broker: MemoryBroker,
    topic: String,
    partition: i32,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, payload: Bytes) -> Result<()> {
        self.broker.delay().await;
        let inner = &self.broker.inner;
        if inner.fail_sends.load(Ordering::SeqCst) {
            return Err(PublishError::Send("leader not available".to_string()));
        }
        inner
            .messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(BrokerMessage {
                topic: self.topic.clone(),
                partition: self.partition,
                payload,
            });
        inner.arrived.notify_waiters();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.broker.inner.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
