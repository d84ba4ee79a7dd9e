//! Threshold alerts with hysteresis.
//!
//! Per (device, sensor) there is either no alert or exactly one open alert.
//! An out-of-bounds sample opens one (or refreshes the open one), and a
//! legal sample closes it only once its measurement time is at least
//! [`HYSTERESIS_WINDOW_SECS`] past the last out-of-bounds sample. All time
//! comparisons use measurement time, so late or backfilled data lands in the
//! same state it would have produced in real time.

use crate::db::alert_store::{AlertStore, OpenOutcome};
use crate::models::alert::{Alert, AlertContext, AlertTrigger, NewAlert};
use crate::models::telemetry::TelemetryMessage;
use crate::processor::decode_batch;
use crate::runtime::BatchHandler;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const HYSTERESIS_WINDOW_SECS: i64 = 10 * 60;

#[derive(Debug)]
pub enum Transition<'a> {
    /// No alert, value legal.
    Idle,
    Open,
    Touch(&'a Alert),
    /// Value legal, but still inside the hysteresis window.
    Hold(&'a Alert),
    Close(&'a Alert),
}

pub fn next_transition<'a>(
    trigger: &AlertTrigger,
    open: Option<&'a Alert>,
    ts: DateTime<Utc>,
    value: f64,
) -> Transition<'a> {
    let out_of_bounds = trigger.is_out_of_bounds(value);
    match open.filter(|alert| alert.is_open()) {
        None if out_of_bounds => Transition::Open,
        None => Transition::Idle,
        Some(alert) if out_of_bounds => Transition::Touch(alert),
        Some(alert) => {
            let window = Duration::seconds(HYSTERESIS_WINDOW_SECS);
            if ts >= alert.context.last_out_of_bounds_ts + window {
                Transition::Close(alert)
            } else {
                Transition::Hold(alert)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Not numeric, or no enabled trigger for the sensor.
    Ignored,
    Idle,
    Opened,
    Touched,
    Held,
    Closed,
    /// Out of bounds, but inside an interval some closed alert already covers.
    Replayed,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct EvaluationReport {
    pub opened: usize,
    pub touched: usize,
    pub held: usize,
    pub closed: usize,
    pub replayed: usize,
    pub idle: usize,
    pub ignored: usize,
    pub invalid: usize,
    pub failed: usize,
}

impl EvaluationReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Ignored => self.ignored += 1,
            Outcome::Idle => self.idle += 1,
            Outcome::Opened => self.opened += 1,
            Outcome::Touched => self.touched += 1,
            Outcome::Held => self.held += 1,
            Outcome::Closed => self.closed += 1,
            Outcome::Replayed => self.replayed += 1,
        }
    }
}

pub struct AlertEvaluator {
    store: Arc<dyn AlertStore>,
}

impl AlertEvaluator {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self { store }
    }

    /// Evaluates a batch in order. A failed message does not stop the rest,
    /// but fails the invocation; re-evaluating a sample is harmless.
    pub async fn evaluate_batch(&self, batch: &[Vec<u8>]) -> Result<EvaluationReport> {
        let validated = decode_batch(self.name(), batch);
        let mut report = EvaluationReport {
            invalid: validated.bad.len(),
            ..EvaluationReport::default()
        };

        for msg in &validated.ok {
            match self.evaluate(msg).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    report.failed += 1;
                    error!(
                        "Failed to evaluate {}/{} at {}: {:#}",
                        msg.device_id, msg.sensor_id, msg.ts, e
                    );
                }
            }
        }

        if report.failed > 0 {
            bail!(
                "{} of {} measurements failed alert evaluation",
                report.failed,
                validated.ok.len()
            );
        }
        Ok(report)
    }

    pub async fn evaluate(&self, msg: &TelemetryMessage) -> Result<Outcome> {
        let Some(value) = msg.numeric_value() else {
            return Ok(Outcome::Ignored);
        };
        let Some(trigger) = self
            .store
            .enabled_trigger(&msg.device_id, &msg.sensor_id)
            .await?
        else {
            return Ok(Outcome::Ignored);
        };

        let open = self
            .store
            .open_alert_for(&msg.device_id, &msg.sensor_id)
            .await?;

        match next_transition(&trigger, open.as_ref(), msg.ts, value) {
            Transition::Idle => Ok(Outcome::Idle),
            Transition::Open => {
                let covering = self
                    .store
                    .closed_alert_covering(&msg.device_id, &msg.sensor_id, msg.ts)
                    .await?;
                if let Some(closed) = covering {
                    debug!(
                        "Sample at {} falls inside closed alert {}, skipping",
                        msg.ts, closed.id
                    );
                    return Ok(Outcome::Replayed);
                }
                self.open(&trigger, msg, value).await
            }
            Transition::Touch(alert) => self.touch(alert, &trigger, msg, value).await,
            Transition::Hold(alert) => {
                debug!(
                    "Alert {} within hysteresis window, last out of bounds at {}",
                    alert.id, alert.context.last_out_of_bounds_ts
                );
                Ok(Outcome::Held)
            }
            Transition::Close(alert) => self.close(alert, msg.ts).await,
        }
    }

    async fn open(&self, trigger: &AlertTrigger, msg: &TelemetryMessage, value: f64) -> Result<Outcome> {
        let alert = NewAlert {
            id: Uuid::new_v4(),
            trigger_id: trigger.id,
            device_id: msg.device_id.clone(),
            sensor_id: msg.sensor_id.clone(),
            start_ts: msg.ts,
            reason: trigger.violation_reason(value),
            context: AlertContext {
                last_value: value,
                min_value: trigger.min_value,
                max_value: trigger.max_value,
                last_out_of_bounds_ts: msg.ts,
            },
        };

        match self.store.open_alert(&alert).await? {
            OpenOutcome::Created(created) => {
                info!(
                    "Opened alert {} (trigger {}) for {}/{}: {}",
                    created.id,
                    created.trigger_id,
                    created.device_id,
                    created.sensor_id,
                    created.reason
                );
                Ok(Outcome::Opened)
            }
            OpenOutcome::AlreadyOpen => {
                // lost the race to a concurrent evaluator, refresh its alert
                let existing = self
                    .store
                    .open_alert_for(&msg.device_id, &msg.sensor_id)
                    .await?
                    .ok_or_else(|| {
                        anyhow!(
                            "Open alert for {}/{} vanished during evaluation",
                            msg.device_id,
                            msg.sensor_id
                        )
                    })?;
                self.touch(&existing, trigger, msg, value).await
            }
        }
    }

    async fn touch(
        &self,
        alert: &Alert,
        trigger: &AlertTrigger,
        msg: &TelemetryMessage,
        value: f64,
    ) -> Result<Outcome> {
        if msg.ts < alert.context.last_out_of_bounds_ts {
            debug!(
                "Alert {} already refreshed past {}, keeping context",
                alert.id, msg.ts
            );
            return Ok(Outcome::Touched);
        }

        let context = AlertContext {
            last_value: value,
            min_value: trigger.min_value,
            max_value: trigger.max_value,
            last_out_of_bounds_ts: msg.ts,
        };
        if self.store.update_context(alert.id, &context).await? {
            return Ok(Outcome::Touched);
        }

        // either a later violation got there first, or the alert was closed
        match self.current_open(alert).await? {
            Some(current) if current.id == alert.id => {
                debug!(
                    "Alert {} already refreshed to {}, keeping context",
                    alert.id, current.context.last_out_of_bounds_ts
                );
                Ok(Outcome::Touched)
            }
            _ => bail!("Alert {} closed while being refreshed", alert.id),
        }
    }

    async fn close(&self, alert: &Alert, end_ts: DateTime<Utc>) -> Result<Outcome> {
        let cutoff = end_ts - Duration::seconds(HYSTERESIS_WINDOW_SECS);
        if self.store.close_alert(alert.id, end_ts, cutoff).await? {
            info!(
                "Closed alert {} (trigger {}) for {}/{} at {}",
                alert.id, alert.trigger_id, alert.device_id, alert.sensor_id, end_ts
            );
            return Ok(Outcome::Closed);
        }

        match self.current_open(alert).await? {
            Some(current) if current.id == alert.id => {
                debug!(
                    "Alert {} refreshed to {} before closing at {}, holding",
                    alert.id, current.context.last_out_of_bounds_ts, end_ts
                );
                Ok(Outcome::Held)
            }
            _ => {
                warn!("Alert {} was already closed", alert.id);
                Ok(Outcome::Closed)
            }
        }
    }

    async fn current_open(&self, alert: &Alert) -> Result<Option<Alert>> {
        self.store
            .open_alert_for(&alert.device_id, &alert.sensor_id)
            .await
    }
}

#[async_trait]
impl BatchHandler for AlertEvaluator {
    fn name(&self) -> &'static str {
        "alerts"
    }

    async fn handle(&self, batch: &[Vec<u8>]) -> Result<()> {
        let report = self.evaluate_batch(batch).await?;
        info!(
            "[alerts] opened={} touched={} held={} closed={} replayed={} idle={} ignored={} invalid={}",
            report.opened,
            report.touched,
            report.held,
            report.closed,
            report.replayed,
            report.idle,
            report.ignored,
            report.invalid
        );
        Ok(())
    }
}
