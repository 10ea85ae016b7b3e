//! Kafka sink backed by `rskafka`

use super::{Connection, Connector};
use crate::config::PublisherConfig;
use crate::error::{PublishError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rskafka::client::partition::{Compression, PartitionClient, UnknownTopicHandling};
use rskafka::client::ClientBuilder;
use rskafka::record::Record;
use std::collections::BTreeMap;

/// Dials a Kafka cluster and produces to a single topic partition
#[derive(Debug, Clone, Default)]
pub struct KafkaConnector {
    max_message_size: Option<usize>,
}

impl KafkaConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Largest response the client accepts from a broker
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = Some(bytes);
        self
    }
}

#[async_trait]
impl Connector for KafkaConnector {
    async fn connect(&self, config: &PublisherConfig) -> Result<Box<dyn Connection>> {
        if config.brokers.is_empty() {
            return Err(PublishError::NoBrokers);
        }

        let mut builder = ClientBuilder::new(config.brokers.clone());
        if let Some(bytes) = self.max_message_size {
            builder = builder.max_message_size(bytes);
        }
        let client = builder
            .build()
            .await
            .map_err(|e| PublishError::Dial(e.to_string()))?;

        // Unknown topics are an error; the broker must already hold the topic.
        let partition = client
            .partition_client(
                config.topic.clone(),
                config.partition,
                UnknownTopicHandling::Error,
            )
            .await
            .map_err(|e| PublishError::Dial(e.to_string()))?;

        tracing::info!(
            brokers = ?config.brokers,
            topic = %config.topic,
            partition = config.partition,
            "connected to kafka"
        );
        Ok(Box::new(KafkaConnection {
            partition: Some(partition),
        }))
    }
}

/// Producer handle for one topic partition
pub struct KafkaConnection {
    partition: Option<PartitionClient>,
}

#[async_trait]
impl Connection for KafkaConnection {
    async fn send(&mut self, payload: Bytes) -> Result<()> {
        let partition = self.partition.as_ref().ok_or(PublishError::Closed)?;
        let record = Record {
            key: None,
            value: Some(payload.to_vec()),
            headers: BTreeMap::new(),
            timestamp: Utc::now(),
        };
        partition
            .produce(vec![record], Compression::NoCompression)
            .await
            .map(|_| ())
            .map_err(|e| PublishError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the partition client releases its broker connection.
        self.partition.take();
        Ok(())
    }
}
