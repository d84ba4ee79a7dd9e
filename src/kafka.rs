use crate::config::{AppConfig, Role};
use crate::queue::{QueueName, QueueSender};
use crate::runtime::{self, BatchHandler, RedeliveryPolicy};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Message, OwnedMessage};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection and SASL settings shared by consumers and producers.
fn base_client_config(config: &AppConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_bootstrap_servers)
        .set("security.protocol", &config.kafka_security_protocol);

    if config.kafka_security_protocol.starts_with("SASL") {
        client_config
            .set("sasl.mechanism", &config.kafka_sasl_mechanism)
            .set("sasl.username", &config.kafka_username)
            .set("sasl.password", &config.kafka_password);
    }
    client_config
}

/// Work queues backed by Kafka topics.
pub struct KafkaQueues {
    producer: FutureProducer,
    topics: HashMap<QueueName, String>,
}

impl KafkaQueues {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let producer: FutureProducer = base_client_config(config)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", "30000")
            .create()
            .context("Error creating Kafka producer")?;

        let topics = HashMap::from([
            (QueueName::TimeSeries, config.queue_timeseries_topic.clone()),
            (QueueName::Archive, config.queue_archive_topic.clone()),
            (QueueName::Alerts, config.queue_alerts_topic.clone()),
        ]);

        Ok(Self { producer, topics })
    }
}

#[async_trait]
impl QueueSender for KafkaQueues {
    async fn send(&self, queue: QueueName, key: &str, body: &str) -> anyhow::Result<()> {
        let topic = self
            .topics
            .get(&queue)
            .ok_or_else(|| anyhow!("No topic configured for queue {}", queue))?;

        self.producer
            .send(FutureRecord::to(topic).key(key).payload(body), SEND_TIMEOUT)
            .await
            .map_err(|(e, _)| anyhow!("Kafka send to {} failed: {}", topic, e))?;
        Ok(())
    }
}

/// Consumes `role`'s topic in batches and hands each batch to `handler`.
///
/// Offsets are committed only after the handler succeeds; a failing batch is
/// redelivered whole. Broker errors trip the same circuit breaker as failing
/// batches.
pub async fn start_batch_consumer(
    config: &AppConfig,
    role: Role,
    handler: Arc<dyn BatchHandler>,
) -> anyhow::Result<()> {
    let topic = config.source_topic(role);
    let group_id = format!("{}-{}", config.kafka_group_id, role);
    info!("[{}] Initializing Kafka consumer for topic: {} (group {})", role, topic, group_id);

    let consumer: StreamConsumer = base_client_config(config)
        .set("group.id", &group_id)
        .set("auto.offset.reset", &config.kafka_auto_offset_reset)
        .set("enable.auto.commit", "false")
        .create()
        .context("Error creating Kafka consumer")?;

    consumer.subscribe(&[topic])?;
    info!("[{}] Subscribed to topic: {}", role, topic);

    let policy = RedeliveryPolicy {
        retry_delay: Duration::from_millis(config.retry_delay_ms),
        max_retries: config.kafka_max_retries,
        cooldown: Duration::from_secs(config.kafka_circuit_breaker_cooldown),
    };
    let linger = Duration::from_millis(config.batch_linger_ms);
    let mut consecutive_failures = 0;

    loop {
        // Circuit Breaker Check
        if consecutive_failures >= policy.max_retries {
            warn!(
                "[{}] Circuit breaker tripped ({} consecutive receive failures)! Sleeping for {} seconds...",
                role, consecutive_failures, config.kafka_circuit_breaker_cooldown
            );
            tokio::time::sleep(policy.cooldown).await;
            consecutive_failures = 0;
            info!("[{}] Circuit breaker reset. Resuming consumption.", role);
        }

        let messages = match collect_batch(&consumer, config.batch_max_size, linger).await {
            Ok(messages) => {
                consecutive_failures = 0;
                messages
            }
            Err(e) => {
                consecutive_failures += 1;
                error!(
                    "[{}] Kafka error: {}. Incrementing failure count ({} / {})",
                    role, e, consecutive_failures, policy.max_retries
                );
                // Small delay to prevent tight loop in case of minor network glitches
                tokio::time::sleep(Duration::from_millis(500)).await;
                continue;
            }
        };

        let payloads: Vec<Vec<u8>> = messages
            .iter()
            .filter_map(|m| m.payload().map(<[u8]>::to_vec))
            .collect();
        if payloads.len() < messages.len() {
            warn!(
                "[{}] Skipping {} empty payloads from Kafka",
                role,
                messages.len() - payloads.len()
            );
        }

        if !payloads.is_empty() {
            let attempts = runtime::deliver(handler.as_ref(), &payloads, &policy).await;
            if attempts > 1 {
                info!("[{}] Batch succeeded after {} attempts", role, attempts);
            }
        }

        if let Err(e) = commit(&consumer, &messages) {
            // the batch will be seen again, which every stage tolerates
            error!("[{}] Offset commit failed: {}", role, e);
        }
    }
}

/// Blocks for one message, then gathers more until the batch is full or
/// `linger` has passed.
async fn collect_batch(
    consumer: &StreamConsumer,
    max_size: usize,
    linger: Duration,
) -> anyhow::Result<Vec<OwnedMessage>> {
    let first = consumer.recv().await?.detach();
    let mut batch = vec![first];
    let deadline = Instant::now() + linger;

    while batch.len() < max_size {
        match tokio::time::timeout_at(deadline, consumer.recv()).await {
            Ok(Ok(m)) => batch.push(m.detach()),
            Ok(Err(e)) => {
                warn!("Kafka error while filling batch: {}", e);
                break;
            }
            Err(_) => break,
        }
    }
    debug!("Collected batch of {} messages", batch.len());
    Ok(batch)
}

fn commit(consumer: &StreamConsumer, messages: &[OwnedMessage]) -> anyhow::Result<()> {
    let mut next: HashMap<(&str, i32), i64> = HashMap::new();
    for m in messages {
        let offset = next.entry((m.topic(), m.partition())).or_insert(m.offset() + 1);
        *offset = (*offset).max(m.offset() + 1);
    }

    let mut tpl = TopicPartitionList::new();
    for ((topic, partition), offset) in next {
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset))?;
    }
    consumer.commit(&tpl, CommitMode::Async)?;
    Ok(())
}
