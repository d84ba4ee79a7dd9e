//! Coerces whatever a queue hands us into a flat list of JSON values.
//!
//! Producers and queue services disagree on envelopes: a body may be raw
//! bytes, a JSON string holding JSON, an array, or an object wrapping the
//! real payload. Every shape is classified into [`QueueItem`] and resolved by
//! [`decode`], so consumers never type-guard payloads themselves.

use serde_json::{Map, Value};
use tracing::debug;

/// Fields under which envelopes carry the real payload.
const WRAPPER_FIELDS: [&str; 4] = ["body", "payload", "data", "message"];

const MAX_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem<'a> {
    Bytes(&'a [u8]),
    Text(String),
    Array(Vec<Value>),
    Wrapped(Value),
    Value(Value),
}

impl QueueItem<'_> {
    pub fn classify(value: Value) -> QueueItem<'static> {
        match value {
            Value::String(s) => QueueItem::Text(s),
            Value::Array(items) => QueueItem::Array(items),
            Value::Object(mut map) => match take_wrapped(&mut map) {
                Some(inner) => QueueItem::Wrapped(inner),
                None => QueueItem::Value(Value::Object(map)),
            },
            other => QueueItem::Value(other),
        }
    }
}

/// A telemetry message is never treated as an envelope, even if it happens
/// to carry one of the wrapper field names.
fn take_wrapped(map: &mut Map<String, Value>) -> Option<Value> {
    if map.contains_key("schemaVersion") {
        return None;
    }
    WRAPPER_FIELDS.iter().find_map(|field| map.remove(*field))
}

pub fn decode(item: QueueItem<'_>) -> Vec<Value> {
    decode_at(item, 0)
}

fn decode_at(item: QueueItem<'_>, depth: usize) -> Vec<Value> {
    if depth > MAX_DEPTH {
        debug!("Dropping queue item nested deeper than {}", MAX_DEPTH);
        return Vec::new();
    }

    match item {
        QueueItem::Bytes(bytes) => match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => decode_at(QueueItem::classify(value), depth + 1),
            Err(e) => {
                debug!("Dropping unparsable payload ({} bytes): {}", bytes.len(), e);
                Vec::new()
            }
        },
        QueueItem::Text(text) => match serde_json::from_str::<Value>(&text) {
            Ok(value) => decode_at(QueueItem::classify(value), depth + 1),
            Err(e) => {
                debug!("Dropping unparsable string payload: {}", e);
                Vec::new()
            }
        },
        QueueItem::Array(items) => items
            .into_iter()
            .flat_map(|v| decode_at(QueueItem::classify(v), depth + 1))
            .collect(),
        QueueItem::Wrapped(inner) => decode_at(QueueItem::classify(inner), depth + 1),
        QueueItem::Value(value) => vec![value],
    }
}

/// Normalizes a batch of raw queue bodies into one flat list.
pub fn normalize_batch(batch: &[Vec<u8>]) -> Vec<Value> {
    batch
        .iter()
        .flat_map(|payload| decode(QueueItem::Bytes(payload)))
        .collect()
}
