use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Threshold configuration for one sensor. Maintained by the configuration
/// API; only read here.
#[derive(Debug, Clone, FromRow)]
pub struct AlertTrigger {
    pub id: Uuid,
    pub device_id: String,
    pub sensor_id: String,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub enabled: bool,
}

impl AlertTrigger {
    pub fn is_out_of_bounds(&self, value: f64) -> bool {
        self.min_value.map_or(false, |min| value < min)
            || self.max_value.map_or(false, |max| value > max)
    }

    /// Human readable explanation of a violation, e.g. `value 72 above max 70`.
    pub fn violation_reason(&self, value: f64) -> String {
        match (self.min_value, self.max_value) {
            (Some(min), _) if value < min => format!("value {} below min {}", value, min),
            (_, Some(max)) if value > max => format!("value {} above max {}", value, max),
            _ => format!("value {} out of bounds", value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertContext {
    pub last_value: f64,
    #[serde(rename = "min")]
    pub min_value: Option<f64>,
    #[serde(rename = "max")]
    pub max_value: Option<f64>,
    pub last_out_of_bounds_ts: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Alert {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub device_id: String,
    pub sensor_id: String,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>, // NULL while open
    pub reason: String,
    pub context: Json<AlertContext>,
}

impl Alert {
    pub fn is_open(&self) -> bool {
        self.end_ts.is_none()
    }
}

/// Insert payload for a freshly opened alert.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub id: Uuid,
    pub trigger_id: Uuid,
    pub device_id: String,
    pub sensor_id: String,
    pub start_ts: DateTime<Utc>,
    pub reason: String,
    pub context: AlertContext,
}
