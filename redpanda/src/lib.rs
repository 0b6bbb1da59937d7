//! Redpanda event log for orderstream.
//!
//! This crate implements the log collaborator ([`LogPublisher`] and
//! [`LogReader`] from `orderstream-core`) on top of rdkafka, so it works with
//! Redpanda, Apache Kafka, AWS MSK, or any other Kafka-compatible cluster.
//!
//! # Delivery Semantics
//!
//! - **Keyed publishing**: every envelope is published with its `order_id` (or
//!   `"unknown"`) as the message key, so all events of one order share a
//!   partition and keep their publish order.
//! - **Positional reads**: readers do not use consumer-group offset commits.
//!   Each subscriber assigns itself every partition at the offsets stored in
//!   its own [`LogPosition`], which the pipeline persists in its checkpoint.
//!   Reads are therefore at-least-once relative to the last checkpoint.
//! - **Earliest start**: partitions absent from a position are read from the
//!   earliest retained offset.
//! - **No silent reset**: an offset that has fallen out of retention fails the
//!   read with [`LogError::InvalidPosition`](orderstream_core::event_bus::LogError)
//!   instead of skipping to another offset.
//!
//! # Example
//!
//! ```no_run
//! use orderstream_core::event_bus::{LogPosition, LogPublisher, LogReader};
//! use orderstream_redpanda::RedpandaEventLog;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let log = RedpandaEventLog::builder()
//!     .brokers("localhost:9092")
//!     .topic("orderstream-events")
//!     .build()?;
//!
//! log.publish("order-1", br#"{"event_type":"ORDER_SNAPSHOT"}"#).await?;
//!
//! let mut reader = log.reader("orders").await?;
//! let batch = reader.read(&LogPosition::earliest(), 500).await?;
//! println!("read {} records", batch.records.len());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use orderstream_core::event_bus::{LogBatch, LogError, LogPosition, LogPublisher, LogReader, LogRecord};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Instant;

/// Redpanda-backed event log.
///
/// Owns the producer used for publishing and hands out one
/// [`RedpandaLogReader`] per subscriber.
///
/// # Configuration
///
/// - **Broker addresses**: Bootstrap servers (required)
/// - **Topic**: The single topic carrying every envelope (required)
/// - **Cluster**: Region/cluster identifier, used as the `client.id` prefix
/// - **Producer settings**: Acks, compression, send timeout
/// - **Reader settings**: Poll timeout (idle read), metadata timeout
pub struct RedpandaEventLog {
    /// Kafka producer for publishing envelopes
    producer: FutureProducer,
    /// Broker addresses (for creating readers)
    brokers: String,
    /// Topic carrying every envelope
    topic: String,
    /// `client.id` prefix
    client_id: String,
    /// Producer send timeout
    timeout: Duration,
    /// How long a read waits for data before returning an empty batch
    poll_timeout: Duration,
    /// Timeout for metadata requests
    metadata_timeout: Duration,
}

impl RedpandaEventLog {
    /// Create an event log with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Unavailable`] if the producer cannot be created.
    pub fn new(brokers: &str, topic: &str) -> Result<Self, LogError> {
        Self::builder().brokers(brokers).topic(topic).build()
    }

    /// Create a new builder for configuring the event log.
    #[must_use]
    pub fn builder() -> RedpandaEventLogBuilder {
        RedpandaEventLogBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Get the topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Verify the cluster is reachable and the topic exists.
    ///
    /// Returns the number of partitions of the topic.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Unavailable`] if metadata cannot be fetched or the
    /// topic is missing.
    pub async fn probe(&self) -> Result<usize, LogError> {
        let partitions = self.partitions().await?;
        tracing::info!(
            brokers = %self.brokers,
            topic = %self.topic,
            partitions = partitions.len(),
            "Event log reachable"
        );
        Ok(partitions.len())
    }

    /// Create a reader for one subscriber.
    ///
    /// Each subscriber (raw archiver, every projector) needs its own reader so
    /// cursors never interfere.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Unavailable`] if the consumer cannot be created or
    /// topic metadata cannot be fetched.
    pub async fn reader(&self, component: &str) -> Result<RedpandaLogReader, LogError> {
        let partitions = self.partitions().await?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", format!("{}-{component}", self.client_id))
            .set("group.id", format!("{}-{component}", self.client_id))
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            // A checkpointed offset the log no longer holds must surface, not
            // silently jump to the earliest or latest record.
            .set("auto.offset.reset", "error")
            .set("session.timeout.ms", "6000")
            .create()
            .map_err(|e| LogError::Unavailable(format!("Failed to create consumer: {e}")))?;

        tracing::info!(
            component = component,
            topic = %self.topic,
            partitions = partitions.len(),
            "Log reader created"
        );

        Ok(RedpandaLogReader {
            consumer,
            topic: self.topic.clone(),
            partitions,
            poll_timeout: self.poll_timeout,
            assigned: None,
        })
    }

    async fn partitions(&self) -> Result<Vec<i32>, LogError> {
        let producer = self.producer.clone();
        let topic = self.topic.clone();
        let timeout = self.metadata_timeout;

        tokio::task::spawn_blocking(move || {
            let metadata = producer
                .client()
                .fetch_metadata(Some(&topic), Timeout::After(timeout))
                .map_err(|e| LogError::Unavailable(format!("Failed to fetch metadata: {e}")))?;

            let entry = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .ok_or_else(|| LogError::Unavailable(format!("Topic '{topic}' not found")))?;

            if let Some(err) = entry.error() {
                return Err(LogError::Unavailable(format!("Topic '{topic}' error: {err:?}")));
            }

            let partitions: Vec<i32> = entry.partitions().iter().map(|p| p.id()).collect();
            if partitions.is_empty() {
                return Err(LogError::Unavailable(format!("Topic '{topic}' has no partitions")));
            }
            Ok(partitions)
        })
        .await
        .map_err(|e| LogError::Unavailable(format!("Metadata task failed: {e}")))?
    }
}

/// Builder for configuring a [`RedpandaEventLog`].
///
/// # Example
///
/// ```no_run
/// use orderstream_redpanda::RedpandaEventLog;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let log = RedpandaEventLog::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .topic("orderstream-events")
///     .cluster("ap-south-1")
///     .producer_acks("all")
///     .poll_timeout(Duration::from_secs(1))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaEventLogBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    cluster: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    poll_timeout: Option<Duration>,
    metadata_timeout: Option<Duration>,
}

impl RedpandaEventLogBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the topic carrying every envelope.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the region/cluster identifier.
    ///
    /// Default: "orderstream"
    #[must_use]
    pub fn cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1", or "all".
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how long a read waits for data before returning an empty batch.
    ///
    /// Default: 1 second
    #[must_use]
    pub const fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    /// Set the timeout for metadata requests.
    ///
    /// Default: 10 seconds
    #[must_use]
    pub const fn metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaEventLog`].
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Unavailable`] if brokers or topic are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventLog, LogError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| LogError::Unavailable("Brokers not configured".to_string()))?;
        let topic = self
            .topic
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| LogError::Unavailable("Topic not configured".to_string()))?;
        let client_id = self.cluster.unwrap_or_else(|| "orderstream".to_string());
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());
        let compression = self.compression.unwrap_or_else(|| "none".to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("client.id", format!("{client_id}-producer"))
            .set("message.timeout.ms", "5000")
            .set("acks", &acks)
            .set("compression.type", &compression)
            .create()
            .map_err(|e| LogError::Unavailable(format!("Failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            client_id = %client_id,
            acks = %acks,
            compression = %compression,
            "RedpandaEventLog created successfully"
        );

        Ok(RedpandaEventLog {
            producer,
            brokers,
            topic,
            client_id,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            poll_timeout: self.poll_timeout.unwrap_or(Duration::from_secs(1)),
            metadata_timeout: self.metadata_timeout.unwrap_or(Duration::from_secs(10)),
        })
    }
}

impl LogPublisher for RedpandaEventLog {
    fn publish(
        &self,
        partition_key: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), LogError>> + Send + '_>> {
        let key = partition_key.to_string();
        let payload = payload.to_vec();

        Box::pin(async move {
            let record = FutureRecord::to(&self.topic).payload(&payload).key(&key);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::trace!(
                        topic = %self.topic,
                        partition = partition,
                        offset = offset,
                        key = %key,
                        "Envelope published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %self.topic,
                        key = %key,
                        error = %kafka_error,
                        "Failed to publish envelope"
                    );
                    Err(LogError::PublishFailed {
                        key,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }
}

/// Positional reader over every partition of the topic.
///
/// The reader is reassigned whenever it is asked to read from a position
/// other than the one its previous read ended at (first read, or replay after
/// a restart).
pub struct RedpandaLogReader {
    consumer: StreamConsumer,
    topic: String,
    partitions: Vec<i32>,
    poll_timeout: Duration,
    /// Position the consumer is currently assigned at
    assigned: Option<LogPosition>,
}

impl RedpandaLogReader {
    fn assign(&mut self, position: &LogPosition) -> Result<(), LogError> {
        let mut assignment = TopicPartitionList::new();
        for partition in &self.partitions {
            let offset = position
                .next_offset(*partition)
                .map_or(Offset::Beginning, Offset::Offset);
            assignment
                .add_partition_offset(&self.topic, *partition, offset)
                .map_err(|e| LogError::InvalidPosition(format!("partition {partition}: {e}")))?;
        }

        for (partition, _) in position.iter() {
            if !self.partitions.contains(&partition) {
                return Err(LogError::InvalidPosition(format!(
                    "partition {partition} does not exist on topic '{}'",
                    self.topic
                )));
            }
        }

        self.consumer
            .assign(&assignment)
            .map_err(|e| LogError::Transport(format!("Failed to assign partitions: {e}")))?;

        tracing::debug!(topic = %self.topic, position = ?position, "Reader assigned");
        self.assigned = Some(position.clone());
        Ok(())
    }
}

/// Classify a consume error. Offsets outside the retained log cannot be
/// retried past and need an operator.
fn consume_error(error: &KafkaError) -> LogError {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::OffsetOutOfRange | RDKafkaErrorCode::AutoOffsetReset) => {
            LogError::InvalidPosition(format!("Offset out of range: {error}"))
        }
        _ => LogError::Transport(format!("Failed to receive message: {error}")),
    }
}

impl LogReader for RedpandaLogReader {
    fn read(
        &mut self,
        position: &LogPosition,
        max_records: usize,
    ) -> Pin<Box<dyn Future<Output = Result<LogBatch, LogError>> + Send + '_>> {
        let position = position.clone();

        Box::pin(async move {
            if self.assigned.as_ref() != Some(&position) {
                self.assign(&position)?;
            }

            let mut next_position = position;
            let mut records = Vec::new();
            let deadline = Instant::now() + self.poll_timeout;

            while records.len() < max_records {
                let Ok(received) = tokio::time::timeout_at(deadline, self.consumer.recv()).await
                else {
                    break; // No more data before the poll deadline
                };

                let message = received.map_err(|e| consume_error(&e))?;

                next_position.advance(message.partition(), message.offset());
                records.push(LogRecord {
                    partition: message.partition(),
                    offset: message.offset(),
                    key: message
                        .key()
                        .map(|k| String::from_utf8_lossy(k).into_owned()),
                    payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                });
            }

            tracing::trace!(topic = %self.topic, records = records.len(), "Read from log");
            self.assigned = Some(next_position.clone());
            Ok(LogBatch {
                records,
                next_position,
            })
        })
    }
}
