use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Number,
    Boolean,
    String,
    Enum,
}

impl ValueType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "number" => Some(ValueType::Number),
            "boolean" => Some(ValueType::Boolean),
            "string" => Some(ValueType::String),
            "enum" => Some(ValueType::Enum),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::String => "string",
            ValueType::Enum => "enum",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw reading as sent by the device. `valueType` says how to read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TelemetryValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl TelemetryValue {
    /// Numeric reading, parsing numeric strings. `None` for booleans and
    /// strings that are not numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TelemetryValue::Number(n) => n.as_f64(),
            TelemetryValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            TelemetryValue::Bool(_) => None,
        }
    }
}

impl fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryValue::Bool(b) => write!(f, "{}", b),
            TelemetryValue::Number(n) => write!(f, "{}", n),
            TelemetryValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMessage {
    pub schema_version: i64,
    pub device_id: String,
    pub sensor_id: String,
    pub ts: DateTime<Utc>, // measurement time
    pub seq: i64,
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub value_type: ValueType,
    pub value: TelemetryValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl TelemetryMessage {
    /// Numeric reading for `number` sensors, `None` otherwise.
    pub fn numeric_value(&self) -> Option<f64> {
        match self.value_type {
            ValueType::Number => self.value.as_f64(),
            _ => None,
        }
    }

    /// Queue routing key. Keeps one sensor on one partition.
    pub fn routing_key(&self) -> String {
        format!("{}:{}", self.device_id, self.sensor_id)
    }
}
