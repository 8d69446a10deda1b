//! Kafka-backed partition log
//!
//! One `StreamConsumer` per partition, manually assigned and positioned at
//! the offset the pipeline asks for. Broker-side auto-commit is disabled;
//! progress lives in the pipeline's offset store.

use super::{PartitionLog, SourceRecord};
use crate::error::{SourceError, SourceResult};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::{Message, Offset, TopicPartitionList};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Kafka connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaSourceConfig {
    /// Bootstrap servers
    pub brokers: String,

    pub topic: String,

    /// Consumer group id, used only for client identification
    pub group_id: String,

    /// Timeout for metadata and watermark queries (milliseconds)
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,

    /// Additional librdkafka properties
    #[serde(default)]
    pub extra_config: HashMap<String, String>,
}

fn default_metadata_timeout_ms() -> u64 {
    5000
}

struct PartitionConsumer {
    consumer: StreamConsumer,
    /// Offset the consumer will deliver next
    position: i64,
}

/// [`PartitionLog`] over a Kafka topic
pub struct KafkaPartitionLog {
    config: KafkaSourceConfig,
    consumers: HashMap<i32, Mutex<PartitionConsumer>>,
    metadata: Arc<BaseConsumer>,
}

impl std::fmt::Debug for KafkaPartitionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaPartitionLog")
            .field("config", &self.config)
            .field("partitions", &self.consumers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl KafkaPartitionLog {
    pub fn new(config: KafkaSourceConfig, partitions: &[i32]) -> SourceResult<Self> {
        let mut consumers = HashMap::new();
        for &partition in partitions {
            let consumer: StreamConsumer = client_config(&config)
                .create()
                .map_err(|e| connection_error(&config, e))?;
            consumers.insert(
                partition,
                Mutex::new(PartitionConsumer {
                    consumer,
                    position: -1,
                }),
            );
        }

        let metadata: BaseConsumer = client_config(&config)
            .create()
            .map_err(|e| connection_error(&config, e))?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            partitions = ?partitions,
            "Kafka partition log created"
        );

        Ok(Self {
            config,
            consumers,
            metadata: Arc::new(metadata),
        })
    }

    async fn watermarks(&self, partition: i32) -> SourceResult<(i64, i64)> {
        if !self.consumers.contains_key(&partition) {
            return Err(SourceError::PartitionNotFound { partition });
        }
        let metadata = Arc::clone(&self.metadata);
        let topic = self.config.topic.clone();
        let timeout = Duration::from_millis(self.config.metadata_timeout_ms);

        tokio::task::spawn_blocking(move || metadata.fetch_watermarks(&topic, partition, timeout))
            .await
            .map_err(|e| SourceError::Connection {
                broker: self.config.brokers.clone(),
                message: format!("watermark query task failed: {}", e),
            })?
            .map_err(|e| connection_error(&self.config, e))
    }
}

fn client_config(config: &KafkaSourceConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", &config.group_id)
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("auto.offset.reset", "error");

    for (key, value) in &config.extra_config {
        client_config.set(key, value);
    }
    client_config
}

fn connection_error(config: &KafkaSourceConfig, e: rdkafka::error::KafkaError) -> SourceError {
    SourceError::Connection {
        broker: config.brokers.clone(),
        message: e.to_string(),
    }
}

#[async_trait]
impl PartitionLog for KafkaPartitionLog {
    async fn poll(
        &self,
        partition: i32,
        from_offset: i64,
        max_batch: usize,
        timeout: Duration,
    ) -> SourceResult<Vec<SourceRecord>> {
        let slot = self
            .consumers
            .get(&partition)
            .ok_or(SourceError::PartitionNotFound { partition })?;
        let mut guard = slot.lock().await;
        let pc = &mut *guard;

        let poll_error = |message: String| SourceError::Poll {
            partition,
            offset: from_offset,
            message,
        };

        if pc.position != from_offset {
            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(&self.config.topic, partition, Offset::Offset(from_offset))
                .map_err(|e| poll_error(e.to_string()))?;
            pc.consumer
                .assign(&tpl)
                .map_err(|e| poll_error(e.to_string()))?;
            pc.position = from_offset;
            debug!(partition, offset = from_offset, "consumer positioned");
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut records = Vec::new();

        while records.len() < max_batch {
            // Block for the first record only; afterwards take what is buffered.
            let received = if records.is_empty() {
                tokio::time::timeout_at(deadline, pc.consumer.recv()).await
            } else {
                tokio::time::timeout(Duration::ZERO, pc.consumer.recv()).await
            };

            let message = match received {
                Ok(Ok(message)) => message,
                Ok(Err(e)) => return Err(poll_error(e.to_string())),
                Err(_) => break,
            };

            let offset = message.offset();
            if message.partition() != partition || offset < from_offset {
                continue;
            }
            records.push(SourceRecord {
                partition,
                offset,
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            });
            pc.position = offset + 1;
        }

        Ok(records)
    }

    async fn earliest_offset(&self, partition: i32) -> SourceResult<i64> {
        Ok(self.watermarks(partition).await?.0)
    }

    async fn latest_offset(&self, partition: i32) -> SourceResult<i64> {
        Ok(self.watermarks(partition).await?.1)
    }
}
