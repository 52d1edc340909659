/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Kafka transports.
//!
//! Commands travel on a single topic keyed by query id. Published rows go to
//! a topic named after the query, keyed by bin id. Payloads are JSON.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::Message;
use std::time::Duration;
use tracing::{debug, info};

use super::{CommandPublisher, CommandSubscriber, ExportedResult, ResultExporter};
use crate::error::TransportError;
use crate::model::{BindingSet, CommandNotification};

fn producer(bootstrap_servers: &str) -> Result<FutureProducer, TransportError> {
    ClientConfig::new()
        .set("bootstrap.servers", bootstrap_servers)
        .set("message.timeout.ms", "30000")
        .create()
        .map_err(|e: KafkaError| TransportError::Publish {
            topic: String::new(),
            message: format!("failed to create producer: {}", e),
        })
}

async fn send(
    producer: &FutureProducer,
    topic: &str,
    key: &str,
    payload: &[u8],
    timeout: Duration,
) -> Result<(), TransportError> {
    let record = FutureRecord::to(topic).key(key).payload(payload);
    producer
        .send(record, Timeout::After(timeout))
        .await
        .map(|_| ())
        .map_err(|(e, _)| TransportError::Publish {
            topic: topic.to_string(),
            message: e.to_string(),
        })
}

async fn flush(producer: &FutureProducer, timeout: Duration) -> Result<(), TransportError> {
    let producer = producer.clone();
    tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
        .await
        .map_err(|e| TransportError::Publish {
            topic: String::new(),
            message: e.to_string(),
        })?
        .map_err(|e| TransportError::Publish {
            topic: String::new(),
            message: format!("flush failed: {}", e),
        })
}

/// Publishes commands to the command topic.
#[derive(Clone)]
pub struct KafkaCommandPublisher {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl std::fmt::Debug for KafkaCommandPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaCommandPublisher")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl KafkaCommandPublisher {
    pub fn new(
        bootstrap_servers: &str,
        topic: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            producer: producer(bootstrap_servers)?,
            topic: topic.into(),
            timeout,
        })
    }
}

#[async_trait]
impl CommandPublisher for KafkaCommandPublisher {
    async fn publish(&self, command: &CommandNotification) -> Result<(), TransportError> {
        let payload = command.to_bytes()?;
        send(&self.producer, &self.topic, command.id(), &payload, self.timeout).await?;
        debug!(topic = %self.topic, command = %command, "Published command");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        flush(&self.producer, self.timeout).await
    }
}

/// Consumes commands from the command topic as part of a consumer group.
pub struct KafkaCommandSubscriber {
    consumer: StreamConsumer,
    topic: String,
}

impl std::fmt::Debug for KafkaCommandSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaCommandSubscriber")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl KafkaCommandSubscriber {
    pub fn new(
        bootstrap_servers: &str,
        group_id: &str,
        topic: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let topic = topic.into();
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e: KafkaError| {
                TransportError::Consume(format!("failed to create consumer: {}", e))
            })?;
        consumer
            .subscribe(&[topic.as_str()])
            .map_err(|e| TransportError::Consume(format!("failed to subscribe to {}: {}", topic, e)))?;
        info!(topic = %topic, group_id = %group_id, "Subscribed to command topic");
        Ok(Self { consumer, topic })
    }
}

#[async_trait]
impl CommandSubscriber for KafkaCommandSubscriber {
    async fn next_command(&mut self) -> Result<Option<CommandNotification>, TransportError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| TransportError::Consume(e.to_string()))?;
        let payload = message
            .payload()
            .ok_or_else(|| TransportError::Codec("command message has no payload".to_string()))?;
        CommandNotification::from_bytes(payload).map(Some)
    }
}

/// Publishes bin results to a topic named after the query.
#[derive(Clone)]
pub struct KafkaResultExporter {
    producer: FutureProducer,
    timeout: Duration,
}

impl std::fmt::Debug for KafkaResultExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaResultExporter").finish_non_exhaustive()
    }
}

impl KafkaResultExporter {
    pub fn new(bootstrap_servers: &str, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            producer: producer(bootstrap_servers)?,
            timeout,
        })
    }
}

#[async_trait]
impl ResultExporter for KafkaResultExporter {
    async fn export(
        &self,
        query_id: &str,
        bin: i64,
        rows: Vec<BindingSet>,
    ) -> Result<(), TransportError> {
        let key = bin.to_string();
        for binding_set in rows {
            let record = ExportedResult {
                query_id: query_id.to_string(),
                bin,
                binding_set,
            };
            let payload =
                serde_json::to_vec(&record).map_err(|e| TransportError::Codec(e.to_string()))?;
            send(&self.producer, query_id, &key, &payload, self.timeout).await?;
        }
        Ok(())
    }
}
