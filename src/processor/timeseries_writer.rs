use crate::db::telemetry_store::{InsertOutcome, TelemetryStore};
use crate::models::telemetry_row::TelemetryRow;
use crate::processor::decode_batch;
use crate::runtime::BatchHandler;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub invalid: usize,
    pub failed: usize,
}

/// Persists queued telemetry into the time-series table.
///
/// Rows are written one by one; the pool size is the real throughput limit.
/// A failed row does not stop the rest of the batch, but fails the
/// invocation once the batch is done. Retrying is safe because inserts of
/// rows that already made it are ignored on conflict.
pub struct TimeSeriesWriter {
    store: Arc<dyn TelemetryStore>,
}

impl TimeSeriesWriter {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    pub async fn write(&self, batch: &[Vec<u8>]) -> Result<WriteReport> {
        let validated = decode_batch(self.name(), batch);
        let mut report = WriteReport {
            invalid: validated.bad.len(),
            ..WriteReport::default()
        };

        for msg in &validated.ok {
            let row = TelemetryRow::from_message(msg);
            match self.store.insert_ignore(&row).await {
                Ok(InsertOutcome::Inserted) => report.inserted += 1,
                Ok(InsertOutcome::Duplicate) => report.duplicates += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        "Failed to insert telemetry {}/{} seq {} at {}: {:#}",
                        row.device_id, row.sensor_id, row.seq, row.ts, e
                    );
                }
            }
        }

        if report.failed > 0 {
            bail!(
                "{} of {} telemetry rows failed to insert",
                report.failed,
                validated.ok.len()
            );
        }
        Ok(report)
    }
}

#[async_trait]
impl BatchHandler for TimeSeriesWriter {
    fn name(&self) -> &'static str {
        "timeseries"
    }

    async fn handle(&self, batch: &[Vec<u8>]) -> Result<()> {
        let report = self.write(batch).await?;
        info!(
            "[timeseries] inserted={} duplicates={} invalid={}",
            report.inserted, report.duplicates, report.invalid
        );
        Ok(())
    }
}
