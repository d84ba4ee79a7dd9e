use crate::models::telemetry::{TelemetryMessage, TelemetryValue, ValueType};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// One row of the `telemetry` table. Exactly one of `value_num`,
/// `value_bool`, `value_text` is set.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct TelemetryRow {
    pub device_id: String,
    pub sensor_id: String,
    pub ts: DateTime<Utc>,
    pub seq: i64,
    pub sensor_type: String,
    pub value_type: String,
    pub value_num: Option<f64>,
    pub value_bool: Option<bool>,
    pub value_text: Option<String>,
    pub unit: Option<String>,
    pub location: Option<String>,
}

impl TelemetryRow {
    pub fn from_message(msg: &TelemetryMessage) -> Self {
        let (value_num, value_bool, value_text) = match (msg.value_type, &msg.value) {
            (ValueType::Number, value) => match value.as_f64() {
                Some(n) => (Some(n), None, None),
                // keep the row, store what we got
                None => (None, None, Some(value.to_string())),
            },
            (ValueType::Boolean, TelemetryValue::Bool(b)) => (None, Some(*b), None),
            (_, value) => (None, None, Some(value.to_string())),
        };

        Self {
            device_id: msg.device_id.clone(),
            sensor_id: msg.sensor_id.clone(),
            ts: msg.ts,
            seq: msg.seq,
            sensor_type: msg.sensor_type.clone(),
            value_type: msg.value_type.as_str().to_string(),
            value_num,
            value_bool,
            value_text,
            unit: msg.unit.clone(),
            location: msg.location.clone(),
        }
    }
}
