//! Mapping between the wire [`Value`] and `serde_json::Value`.
//!
//! `from_json` is exact. `to_json` is lossy for types JSON cannot carry:
//!
//! | wire value              | JSON                                   |
//! |-------------------------|----------------------------------------|
//! | binary                  | standard base64 string                 |
//! | ext (any type tag)      | standard base64 string of the payload  |
//! | `f32`                   | widened to `f64`                       |
//! | NaN / ±infinity         | `null`                                 |
//! | non-string map key      | the key's JSON text (`1` becomes `"1"`) |
//! | invalid UTF-8 string    | lossy UTF-8                            |

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rmpv::Value;
use serde_json::{Map, Number};

pub fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(n) => {
            if let Some(u) = n.as_u64() {
                serde_json::Value::Number(u.into())
            } else if let Some(i) = n.as_i64() {
                serde_json::Value::Number(i.into())
            } else {
                serde_json::Value::Null
            }
        }
        Value::F32(f) => float(f64::from(*f)),
        Value::F64(f) => float(*f),
        Value::String(s) => match s.as_str() {
            Some(text) => serde_json::Value::String(text.to_owned()),
            None => serde_json::Value::String(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        },
        Value::Binary(bytes) => serde_json::Value::String(STANDARD.encode(bytes)),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (k, v) in entries {
                let _ = map.insert(map_key(k), to_json(v));
            }
            serde_json::Value::Object(map)
        }
        Value::Ext(_, payload) => serde_json::Value::String(STANDARD.encode(payload)),
    }
}

pub fn from_json(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Value::from(u)
            } else if let Some(i) = n.as_i64() {
                Value::from(i)
            } else {
                Value::F64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::from(s),
        serde_json::Value::Array(items) => Value::Array(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (Value::from(k), from_json(v)))
                .collect(),
        ),
    }
}

fn float(f: f64) -> serde_json::Value {
    Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

fn map_key(key: &Value) -> String {
    match to_json(key) {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}
