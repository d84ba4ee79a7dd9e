//! Ingestion entry point: validates upstream batches and fans every valid
//! message out to the time-series, archive and alert queues.
//!
//! Any failed send fails the whole invocation so the batch is redelivered.
//! Messages that were already enqueued before the failure get enqueued again
//! on redelivery; every consumer is idempotent or tolerates duplicates.

use crate::models::telemetry::TelemetryMessage;
use crate::processor::decode_batch;
use crate::queue::{QueueName, QueueSender};
use crate::runtime::BatchHandler;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{future, stream, TryStreamExt};
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_CONCURRENCY: usize = 32;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub received: usize,
    pub valid: usize,
    pub invalid: usize,
    pub dispatched: usize,
}

pub struct Dispatcher {
    queues: Arc<dyn QueueSender>,
    concurrency: usize,
}

impl Dispatcher {
    pub fn new(queues: Arc<dyn QueueSender>, concurrency: usize) -> Self {
        Self {
            queues,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn dispatch(&self, batch: &[Vec<u8>]) -> Result<DispatchReport> {
        let validated = decode_batch(self.name(), batch);
        let mut report = DispatchReport {
            received: validated.ok.len() + validated.bad.len(),
            valid: validated.ok.len(),
            invalid: validated.bad.len(),
            dispatched: 0,
        };

        if validated.ok.is_empty() {
            return Ok(report);
        }

        let queues = self.queues.as_ref();
        stream::iter(validated.ok.iter().map(Ok::<_, anyhow::Error>))
            .try_for_each_concurrent(self.concurrency, |msg| fan_out(queues, msg))
            .await?;

        report.dispatched = validated.ok.len();
        Ok(report)
    }
}

/// Sends one message to all three queues.
async fn fan_out(queues: &dyn QueueSender, msg: &TelemetryMessage) -> Result<()> {
    let body = serde_json::to_string(msg)?;
    let key = msg.routing_key();

    future::try_join_all(QueueName::ALL.iter().map(|queue| {
        let (body, key) = (&body, &key);
        async move {
            queues
                .send(*queue, key, body)
                .await
                .with_context(|| format!("Error enqueuing {} seq {} to {}", key, msg.seq, queue))
        }
    }))
    .await?;
    Ok(())
}

#[async_trait]
impl BatchHandler for Dispatcher {
    fn name(&self) -> &'static str {
        "dispatcher"
    }

    async fn handle(&self, batch: &[Vec<u8>]) -> Result<()> {
        let report = self.dispatch(batch).await?;
        info!(
            "[dispatcher] received={} valid={} invalid={} dispatched={}",
            report.received, report.valid, report.invalid, report.dispatched
        );
        Ok(())
    }
}
