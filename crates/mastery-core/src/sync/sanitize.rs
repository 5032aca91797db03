//! Payload cleanup before remote writes.

use serde_json::Value;

/// Remove null leaves recursively.
///
/// Null object fields are dropped and null array elements are skipped.
/// The remote store rejects explicit nulls it was not asked to store, and an
/// absent optional field already round-trips to `None`.
pub fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .filter(|v| !v.is_null())
                .map(strip_nulls)
                .collect(),
        ),
        other => other,
    }
}
