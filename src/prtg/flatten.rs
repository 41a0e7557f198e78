//! Flattening of arbitrary JSON documents into dotted-path key/value pairs.

use super::{KeyValue, ScalarValue};
use serde_json::Value;

/// Flatten a JSON document.
///
/// Object nesting is joined with `.`, array elements are addressed as `[i]`.
/// Empty objects and arrays produce no pairs.
pub fn flatten_json(value: &Value) -> Vec<KeyValue> {
    let mut out = Vec::new();
    flatten_into(String::new(), value, &mut out);
    out
}

fn flatten_into(prefix: String, value: &Value, out: &mut Vec<KeyValue>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(path, child, out);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_into(format!("{}[{}]", prefix, i), item, out);
            }
        }
        scalar => {
            if !prefix.is_empty() {
                out.push(KeyValue {
                    key: prefix,
                    value: ScalarValue::from(scalar.clone()),
                });
            }
        }
    }
}
