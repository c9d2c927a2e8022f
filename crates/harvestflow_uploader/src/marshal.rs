//! Field-type marshalling (`spec.md` §4.6). One policy, centralized here,
//! rather than ad-hoc datetime parsing spread across components (`spec.md`
//! §9, "Ad-hoc datetime parsing spread across the code").

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::transport::FieldType;

/// A source integer below this is treated as seconds-since-epoch rather
/// than milliseconds (`spec.md` §4.6).
const SECONDS_VS_MILLIS_THRESHOLD: i64 = 10_000_000_000;

/// Marshals one local value into the shape its remote field type expects.
/// Returns `None` when the field should be omitted from the payload rather
/// than sent with a zero/empty placeholder — currently only the datetime
/// rule's "unparseable, or the value is absent" case (`spec.md` §4.6, §7).
pub fn marshal_field(value: &Value, field_type: FieldType) -> Option<Value> {
    match field_type {
        FieldType::Text | FieldType::Other => Some(Value::String(coerce_to_string(value))),
        FieldType::Number => Some(Value::from(coerce_to_number(value))),
        FieldType::DateTime => coerce_to_epoch_millis(value).map(Value::from),
    }
}

fn coerce_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// "coerced to integer (via float parse then truncate) on best effort;
/// non-numeric -> 0" (`spec.md` §4.6).
fn coerce_to_number(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_f64().map(|f| f.trunc() as i64).unwrap_or(0),
        Value::String(s) => s.trim().parse::<f64>().map(|f| f.trunc() as i64).unwrap_or(0),
        Value::Bool(b) => *b as i64,
        _ => 0,
    }
}

/// `spec.md` §4.6: coerced to milliseconds since epoch; a source integer
/// below `10^10` is treated as seconds and multiplied by 1000; ISO strings
/// are parsed; unparseable (or absent) -> `None`, never zero (`spec.md` §7).
fn coerce_to_epoch_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Null => None,
        Value::Number(n) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            if raw < SECONDS_VS_MILLIS_THRESHOLD {
                Some(raw * 1000)
            } else {
                Some(raw)
            }
        }
        Value::String(s) => {
            if s.is_empty() {
                return None;
            }
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
                .ok()
        }
        _ => None,
    }
}
