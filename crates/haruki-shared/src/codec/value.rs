//! In-memory model of a decoded game payload.
//!
//! MessagePack maps come in two flavours on the wire: plain maps and ordered
//! maps carried in extension 100. Both keep insertion order here, but the
//! variant records which form the value was read from so that re-encoding
//! reproduces the original bytes.

use base64::Engine;
use indexmap::IndexMap;
use serde_json::{Map, Number, Value as Json};

pub type OrderedMap = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    /// Only used for integers above `i64::MAX`.
    UInt(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bin(Vec<u8>),
    Array(Vec<Value>),
    /// Plain MessagePack map.
    Map(OrderedMap),
    /// Map encoded as extension 100.
    Ordered(OrderedMap),
    /// Any other extension type, kept as raw bytes.
    Ext(i8, Vec<u8>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::UInt(_) => "integer",
            Value::F32(_) | Value::F64(_) => "float",
            Value::Str(_) => "string",
            Value::Bin(_) => "binary",
            Value::Array(_) => "array",
            Value::Map(_) | Value::Ordered(_) => "map",
            Value::Ext(..) => "extension",
        }
    }

    pub fn as_map(&self) -> Option<&OrderedMap> {
        match self {
            Value::Map(m) | Value::Ordered(m) => Some(m),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Builds an ordered map value from `(key, value)` pairs.
    pub fn ordered<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Value {
        Value::Ordered(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Converts to JSON. Binary and foreign extension payloads become
    /// base64 strings; non-finite floats become `null`.
    pub fn into_json(self) -> Json {
        match self {
            Value::Nil => Json::Null,
            Value::Bool(b) => Json::Bool(b),
            Value::Int(i) => Json::Number(i.into()),
            Value::UInt(u) => Json::Number(u.into()),
            Value::F32(f) => float_to_json(f as f64),
            Value::F64(f) => float_to_json(f),
            Value::Str(s) => Json::String(s),
            Value::Bin(b) | Value::Ext(_, b) => {
                Json::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
            Value::Array(items) => Json::Array(items.into_iter().map(Value::into_json).collect()),
            Value::Map(m) | Value::Ordered(m) => {
                let mut out = Map::with_capacity(m.len());
                for (k, v) in m {
                    out.insert(k, v.into_json());
                }
                Json::Object(out)
            }
        }
    }

    /// Converts from JSON. Objects become ordered maps, which is what the
    /// game expects for request bodies.
    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Nil,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => number_to_value(n),
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            Json::Object(m) => Value::Ordered(
                m.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        match i64::try_from(u) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::UInt(u),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

fn float_to_json(f: f64) -> Json {
    Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null)
}

fn number_to_value(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Int(i)
    } else if let Some(u) = n.as_u64() {
        Value::UInt(u)
    } else {
        Value::F64(n.as_f64().unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_keeps_key_order() {
        let value = Value::ordered([
            ("zeta", Value::Int(1)),
            ("alpha", Value::Int(2)),
            ("mid", Value::Int(3)),
        ]);
        let json = value.into_json();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_from_json_objects_are_ordered() {
        let value = Value::from_json(&json!({"b": 1, "a": [true, null, "x"]}));
        match &value {
            Value::Ordered(m) => {
                assert_eq!(m.keys().collect::<Vec<_>>(), ["b", "a"]);
                assert_eq!(
                    m["a"],
                    Value::Array(vec![Value::Bool(true), Value::Nil, Value::from("x")])
                );
            }
            other => panic!("expected ordered map, got {other:?}"),
        }
    }

    #[test]
    fn test_large_unsigned_stays_unsigned() {
        assert_eq!(Value::from(5u64), Value::Int(5));
        assert_eq!(Value::from(u64::MAX), Value::UInt(u64::MAX));
        assert_eq!(Value::from_json(&json!(u64::MAX)), Value::UInt(u64::MAX));
    }

    #[test]
    fn test_binary_becomes_base64() {
        let json = Value::Bin(vec![1, 2, 3]).into_json();
        assert_eq!(json, json!("AQID"));
    }
}
