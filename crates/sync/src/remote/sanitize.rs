//! Normalization of backend-specific values in remote documents.
//!
//! Managed document stores encode timestamps and cross-document references
//! as structured objects. The replica expects plain values, so every
//! document is rewritten recursively:
//!
//! - `{"_seconds": s, "_nanoseconds": n}` / `{"seconds": s, "nanos": n}` → RFC 3339 string
//! - `{"timestampValue": "..."}` → the contained string
//! - `{"__ref__": "orgs/acme"}` / `{"referenceValue": "projects/.../acme"}` → `"acme"`

use chrono::{DateTime, SecondsFormat};
use serde_json::{Map, Value};

/// Rewrite timestamp-like and reference values in `document`.
#[must_use]
pub fn sanitize_document(document: Value) -> Value {
    match document {
        Value::Object(map) => {
            if let Some(plain) = plain_value(&map) {
                return plain;
            }
            Value::Object(
                map.into_iter()
                    .map(|(key, value)| (key, sanitize_document(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_document).collect()),
        other => other,
    }
}

fn plain_value(map: &Map<String, Value>) -> Option<Value> {
    if let Some(timestamp) = timestamp(map, "_seconds", "_nanoseconds")
        .or_else(|| timestamp(map, "seconds", "nanos"))
    {
        return Some(Value::String(timestamp));
    }

    if map.len() == 1 {
        if let Some(Value::String(ts)) = map.get("timestampValue") {
            return Some(Value::String(ts.clone()));
        }
        if let Some(Value::String(path)) = map.get("__ref__").or_else(|| map.get("referenceValue")) {
            return Some(Value::String(last_segment(path).to_string()));
        }
    }

    None
}

fn timestamp(map: &Map<String, Value>, seconds_key: &str, nanos_key: &str) -> Option<String> {
    if map.len() != 2 {
        return None;
    }
    let seconds = map.get(seconds_key)?.as_i64()?;
    let nanos = u32::try_from(map.get(nanos_key)?.as_u64()?).ok()?;
    DateTime::from_timestamp(seconds, nanos)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn last_segment(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}
