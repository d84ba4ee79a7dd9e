//! Appends queued telemetry to hourly, per-sensor NDJSON objects.
//!
//! Appends are not deduplicated: a redelivered queue message is archived
//! twice. Each record keeps `(deviceId, sensorId, ts, seq)`, so readers can
//! drop duplicates.

use crate::blob::BlobStore;
use crate::models::telemetry::TelemetryMessage;
use crate::processor::decode_batch;
use crate::runtime::BatchHandler;
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Timelike, Utc};
use futures::{stream, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PartitionKey {
    pub hour: DateTime<Utc>,
    pub device_id: String,
    pub sensor_id: String,
}

impl PartitionKey {
    pub fn of(msg: &TelemetryMessage) -> Self {
        let into_hour = Duration::seconds(i64::from(msg.ts.minute() * 60 + msg.ts.second()))
            + Duration::nanoseconds(i64::from(msg.ts.nanosecond()));
        Self {
            hour: msg.ts - into_hour,
            device_id: msg.device_id.clone(),
            sensor_id: msg.sensor_id.clone(),
        }
    }

    /// `YYYY/MM/DD/HH/<device>/<sensor>.ndjson`
    pub fn object_path(&self) -> String {
        format!(
            "{}/{}/{}.ndjson",
            self.hour.format("%Y/%m/%d/%H"),
            encode_segment(&self.device_id),
            encode_segment(&self.sensor_id)
        )
    }
}

/// Percent-encodes every byte outside `[A-Za-z0-9_-]` so ids can never form
/// separators or `..`.
fn encode_segment(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub partitions: usize,
    pub records: usize,
    pub invalid: usize,
    pub failed_partitions: usize,
}

pub struct ArchiveWriter {
    store: Arc<dyn BlobStore>,
    concurrency: usize,
}

impl ArchiveWriter {
    pub fn new(store: Arc<dyn BlobStore>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn archive(&self, batch: &[Vec<u8>]) -> Result<ArchiveReport> {
        let validated = decode_batch(self.name(), batch);

        let mut partitions: BTreeMap<PartitionKey, Vec<u8>> = BTreeMap::new();
        for msg in &validated.ok {
            let buf = partitions.entry(PartitionKey::of(msg)).or_default();
            serde_json::to_writer(&mut *buf, msg)?;
            buf.push(b'\n');
        }

        let mut report = ArchiveReport {
            partitions: partitions.len(),
            records: validated.ok.len(),
            invalid: validated.bad.len(),
            failed_partitions: 0,
        };

        let uploads = partitions.into_iter().map(|(key, ndjson)| {
            let store = self.store.clone();
            async move {
                let path = key.object_path();
                let result = store.append(&path, &ndjson).await;
                (path, result)
            }
        });
        let results: Vec<(String, Result<()>)> = stream::iter(uploads)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (path, result) in results {
            if let Err(e) = result {
                report.failed_partitions += 1;
                error!("Failed to append archive partition {}: {:#}", path, e);
            }
        }

        if report.failed_partitions > 0 {
            bail!(
                "{} of {} archive partitions failed to append",
                report.failed_partitions,
                report.partitions
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl BatchHandler for ArchiveWriter {
    fn name(&self) -> &'static str {
        "archive"
    }

    async fn handle(&self, batch: &[Vec<u8>]) -> Result<()> {
        let report = self.archive(batch).await?;
        info!(
            "[archive] partitions={} records={} invalid={}",
            report.partitions, report.records, report.invalid
        );
        Ok(())
    }
}
