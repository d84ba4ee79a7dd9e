use crate::models::telemetry::{TelemetryMessage, TelemetryValue, ValueType, SCHEMA_VERSION};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

fn issue(path: &str, message: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        path: path.to_string(),
        message: message.into(),
    }
}

#[derive(Debug, Clone)]
pub struct Rejected {
    pub payload: Value,
    pub issues: Vec<ValidationIssue>,
}

#[derive(Debug, Default)]
pub struct Validated {
    pub ok: Vec<TelemetryMessage>,
    pub bad: Vec<Rejected>,
}

/// Splits a normalized batch into typed messages and rejects. Never fails:
/// a bad item only ever lands in `bad`.
pub fn validate_batch(values: Vec<Value>) -> Validated {
    let mut out = Validated::default();
    for payload in values {
        match validate(&payload) {
            Ok(msg) => out.ok.push(msg),
            Err(issues) => out.bad.push(Rejected { payload, issues }),
        }
    }
    out
}

/// Validates a single payload, reporting every problem found.
pub fn validate(value: &Value) -> Result<TelemetryMessage, Vec<ValidationIssue>> {
    let Some(obj) = value.as_object() else {
        return Err(vec![issue("", "expected a JSON object")]);
    };
    let mut issues = Vec::new();

    match obj.get("schemaVersion") {
        Some(v) if v.as_i64() == Some(SCHEMA_VERSION) => {}
        Some(v) => issues.push(issue(
            "schemaVersion",
            format!("unsupported schema version {}, expected {}", v, SCHEMA_VERSION),
        )),
        None => issues.push(issue("schemaVersion", "required")),
    }

    let device_id = required_str(obj, "deviceId", &mut issues);
    let sensor_id = required_str(obj, "sensorId", &mut issues);
    let sensor_type = required_str(obj, "type", &mut issues);

    let ts = required_str(obj, "ts", &mut issues).and_then(|raw| {
        match DateTime::parse_from_rfc3339(raw) {
            Ok(t) => Some(t.with_timezone(&Utc)),
            Err(e) => {
                issues.push(issue("ts", format!("invalid ISO-8601 timestamp: {}", e)));
                None
            }
        }
    });

    let seq = match obj.get("seq") {
        None | Some(Value::Null) => {
            issues.push(issue("seq", "required"));
            None
        }
        Some(v) => match v.as_i64() {
            Some(n) if n >= 0 => Some(n),
            _ => {
                issues.push(issue("seq", "expected a non-negative 64-bit integer"));
                None
            }
        },
    };

    let value_type = required_str(obj, "valueType", &mut issues).and_then(|raw| {
        let parsed = ValueType::parse(raw);
        if parsed.is_none() {
            issues.push(issue(
                "valueType",
                format!("unknown value type '{}', expected number, boolean, string or enum", raw),
            ));
        }
        parsed
    });

    let value = match obj.get("value") {
        None | Some(Value::Null) => {
            issues.push(issue("value", "required"));
            None
        }
        Some(raw) => value_type.and_then(|vt| match typed_value(vt, raw) {
            Some(v) => Some(v),
            None => {
                issues.push(issue(
                    "value",
                    format!("{} is not compatible with valueType {}", json_kind(raw), vt),
                ));
                None
            }
        }),
    };

    let unit = optional_str(obj, "unit", &mut issues);
    let location = optional_str(obj, "location", &mut issues);

    match (device_id, sensor_id, sensor_type, ts, seq, value_type, value) {
        (
            Some(device_id),
            Some(sensor_id),
            Some(sensor_type),
            Some(ts),
            Some(seq),
            Some(value_type),
            Some(value),
        ) if issues.is_empty() => {
            Ok(TelemetryMessage {
                schema_version: SCHEMA_VERSION,
                device_id: device_id.to_string(),
                sensor_id: sensor_id.to_string(),
                ts,
                seq,
                sensor_type: sensor_type.to_string(),
                value_type,
                value,
                unit,
                location,
            })
        }
        _ => {
            if issues.is_empty() {
                issues.push(issue("", "invalid telemetry message"));
            }
            Err(issues)
        }
    }
}

fn typed_value(value_type: ValueType, raw: &Value) -> Option<TelemetryValue> {
    match (value_type, raw) {
        (ValueType::Number, Value::Number(n)) => Some(TelemetryValue::Number(n.clone())),
        // parsed (or kept as text) at the persistence boundary
        (ValueType::Number, Value::String(s)) => Some(TelemetryValue::Text(s.clone())),
        (ValueType::Boolean, Value::Bool(b)) => Some(TelemetryValue::Bool(*b)),
        (ValueType::String | ValueType::Enum, Value::String(s)) => {
            Some(TelemetryValue::Text(s.clone()))
        }
        _ => None,
    }
}

fn required_str<'a>(
    obj: &'a Map<String, Value>,
    field: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<&'a str> {
    match obj.get(field) {
        None | Some(Value::Null) => {
            issues.push(issue(field, "required"));
            None
        }
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
        Some(Value::String(_)) => {
            issues.push(issue(field, "must not be empty"));
            None
        }
        Some(other) => {
            issues.push(issue(field, format!("expected string, got {}", json_kind(other))));
            None
        }
    }
}

fn optional_str(
    obj: &Map<String, Value>,
    field: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<String> {
    match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            issues.push(issue(field, format!("expected string, got {}", json_kind(other))));
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
