//! In-memory stand-ins for the queue, stores and blob storage.

use crate::blob::BlobStore;
use crate::db::alert_store::{AlertStore, OpenOutcome};
use crate::db::telemetry_store::{InsertOutcome, TelemetryStore};
use crate::models::alert::{Alert, AlertContext, AlertTrigger, NewAlert};
use crate::models::telemetry::{TelemetryMessage, TelemetryValue, ValueType, SCHEMA_VERSION};
use crate::models::telemetry_row::TelemetryRow;
use crate::queue::{QueueName, QueueSender};
use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

pub fn message(device_id: &str, sensor_id: &str, ts: &str, value: f64) -> TelemetryMessage {
    let ts: DateTime<Utc> = ts.parse().unwrap();
    TelemetryMessage {
        schema_version: SCHEMA_VERSION,
        device_id: device_id.to_string(),
        sensor_id: sensor_id.to_string(),
        ts,
        seq: ts.timestamp(),
        sensor_type: "temperature".to_string(),
        value_type: ValueType::Number,
        value: TelemetryValue::Number(serde_json::Number::from_f64(value).unwrap()),
        unit: Some("C".to_string()),
        location: None,
    }
}

pub fn body(msg: &TelemetryMessage) -> Vec<u8> {
    serde_json::to_vec(msg).unwrap()
}

#[derive(Default)]
pub struct MemoryQueues {
    sent: Mutex<Vec<(QueueName, String, String)>>,
    failing: Mutex<HashSet<QueueName>>,
}

impl MemoryQueues {
    pub fn fail(&self, queue: QueueName) {
        self.failing.lock().unwrap().insert(queue);
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn bodies(&self, queue: QueueName) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(q, _, _)| *q == queue)
            .map(|(_, _, body)| body.clone().into_bytes())
            .collect()
    }

    pub fn keys(&self, queue: QueueName) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(q, _, _)| *q == queue)
            .map(|(_, key, _)| key.clone())
            .collect()
    }
}

#[async_trait]
impl QueueSender for MemoryQueues {
    async fn send(&self, queue: QueueName, key: &str, body: &str) -> anyhow::Result<()> {
        if self.failing.lock().unwrap().contains(&queue) {
            bail!("queue {} unavailable", queue);
        }
        self.sent
            .lock()
            .unwrap()
            .push((queue, key.to_string(), body.to_string()));
        Ok(())
    }
}

type RowKey = (String, String, DateTime<Utc>, i64);

#[derive(Default)]
pub struct MemoryTelemetryStore {
    rows: Mutex<BTreeMap<RowKey, TelemetryRow>>,
    failing_seqs: Mutex<HashSet<i64>>,
}

impl MemoryTelemetryStore {
    pub fn fail_seq(&self, seq: i64) {
        self.failing_seqs.lock().unwrap().insert(seq);
    }

    pub fn heal(&self) {
        self.failing_seqs.lock().unwrap().clear();
    }

    pub fn rows(&self) -> Vec<TelemetryRow> {
        self.rows.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    async fn insert_ignore(&self, row: &TelemetryRow) -> anyhow::Result<InsertOutcome> {
        if self.failing_seqs.lock().unwrap().contains(&row.seq) {
            bail!("connection reset");
        }
        let key = (row.device_id.clone(), row.sensor_id.clone(), row.ts, row.seq);
        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }
        rows.insert(key, row.clone());
        Ok(InsertOutcome::Inserted)
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<Vec<String>>,
}

impl MemoryBlobStore {
    /// Fails appends to any path containing `fragment`.
    pub fn fail_matching(&self, fragment: &str) {
        self.failing.lock().unwrap().push(fragment.to_string());
    }

    pub fn text(&self, path: &str) -> Option<String> {
        self.blobs
            .lock()
            .unwrap()
            .get(path)
            .map(|b| String::from_utf8(b.clone()).unwrap())
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.blobs.lock().unwrap().keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn append(&self, path: &str, data: &[u8]) -> anyhow::Result<()> {
        if self.failing.lock().unwrap().iter().any(|f| path.contains(f.as_str())) {
            bail!("blob service unavailable");
        }
        self.blobs
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }
}

/// Alert store that enforces one open alert per sensor, like the partial
/// unique index does.
#[derive(Default)]
pub struct MemoryAlertStore {
    triggers: Mutex<Vec<AlertTrigger>>,
    alerts: Mutex<Vec<Alert>>,
    stale_reads: Mutex<u32>,
    fail_reads: Mutex<bool>,
}

impl MemoryAlertStore {
    pub fn with_trigger(min: Option<f64>, max: Option<f64>) -> Self {
        let store = Self::default();
        store.add_trigger("pi-01", "cpu-temp", min, max, true);
        store
    }

    pub fn add_trigger(&self, device_id: &str, sensor_id: &str, min: Option<f64>, max: Option<f64>, enabled: bool) {
        self.triggers.lock().unwrap().push(AlertTrigger {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            sensor_id: sensor_id.to_string(),
            min_value: min,
            max_value: max,
            enabled,
        });
    }

    /// The next `n` open-alert lookups miss, as if another evaluator opened
    /// the alert concurrently.
    pub fn stale_reads(&self, n: u32) {
        *self.stale_reads.lock().unwrap() = n;
    }

    pub fn fail_reads(&self, fail: bool) {
        *self.fail_reads.lock().unwrap() = fail;
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn open_count(&self, device_id: &str, sensor_id: &str) -> usize {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.device_id == device_id && a.sensor_id == sensor_id && a.is_open())
            .count()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn enabled_trigger(&self, device_id: &str, sensor_id: &str) -> anyhow::Result<Option<AlertTrigger>> {
        if *self.fail_reads.lock().unwrap() {
            bail!("database unavailable");
        }
        Ok(self
            .triggers
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.device_id == device_id && t.sensor_id == sensor_id && t.enabled)
            .cloned())
    }

    async fn open_alert_for(&self, device_id: &str, sensor_id: &str) -> anyhow::Result<Option<Alert>> {
        let mut stale = self.stale_reads.lock().unwrap();
        if *stale > 0 {
            *stale -= 1;
            return Ok(None);
        }
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.device_id == device_id && a.sensor_id == sensor_id && a.is_open())
            .cloned())
    }

    async fn closed_alert_covering(
        &self,
        device_id: &str,
        sensor_id: &str,
        ts: DateTime<Utc>,
    ) -> anyhow::Result<Option<Alert>> {
        Ok(self
            .alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.device_id == device_id && a.sensor_id == sensor_id)
            .filter(|a| matches!(a.end_ts, Some(end) if a.start_ts <= ts && ts <= end))
            .max_by_key(|a| a.start_ts)
            .cloned())
    }

    async fn open_alert(&self, new: &NewAlert) -> anyhow::Result<OpenOutcome> {
        let mut alerts = self.alerts.lock().unwrap();
        if alerts
            .iter()
            .any(|a| a.device_id == new.device_id && a.sensor_id == new.sensor_id && a.is_open())
        {
            return Ok(OpenOutcome::AlreadyOpen);
        }
        let alert = Alert {
            id: new.id,
            trigger_id: new.trigger_id,
            device_id: new.device_id.clone(),
            sensor_id: new.sensor_id.clone(),
            start_ts: new.start_ts,
            end_ts: None,
            reason: new.reason.clone(),
            context: Json(new.context.clone()),
        };
        alerts.push(alert.clone());
        Ok(OpenOutcome::Created(alert))
    }

    async fn update_context(&self, alert_id: Uuid, context: &AlertContext) -> anyhow::Result<bool> {
        let mut alerts = self.alerts.lock().unwrap();
        let newest = context.last_out_of_bounds_ts;
        let current = alerts
            .iter_mut()
            .find(|a| a.id == alert_id && a.is_open() && a.context.last_out_of_bounds_ts <= newest);
        match current {
            Some(alert) => {
                alert.context = Json(context.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn close_alert(
        &self,
        alert_id: Uuid,
        end_ts: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut alerts = self.alerts.lock().unwrap();
        let current = alerts
            .iter_mut()
            .find(|a| a.id == alert_id && a.is_open() && a.context.last_out_of_bounds_ts <= cutoff);
        match current {
            Some(alert) => {
                alert.end_ts = Some(end_ts);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
