//! MessagePack with the ordered-map extension.
//!
//! An ordered map is written as extension type 100 whose payload is the
//! plain map `{"k": [keys...], "v": [values...]}`. Everything else is
//! standard MessagePack.

use rmp::{decode, encode, Marker};

use crate::constants::ORDERED_MAP_EXT;
use crate::error::CodecError;

use super::value::{OrderedMap, Value};

/// Nesting limit for decoding untrusted input.
const MAX_DEPTH: usize = 512;

fn encode_err<E: std::fmt::Debug>(e: E) -> CodecError {
    CodecError::Encode(format!("{e:?}"))
}

fn len_u32(len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::Encode(format!("length {len} exceeds u32")))
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

pub fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::with_capacity(256);
    write_value(&mut buf, value)?;
    Ok(buf)
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), CodecError> {
    match value {
        Value::Nil => encode::write_nil(buf).map_err(encode_err)?,
        Value::Bool(b) => encode::write_bool(buf, *b).map_err(encode_err)?,
        Value::Int(i) => {
            encode::write_sint(buf, *i).map_err(encode_err)?;
        }
        Value::UInt(u) => {
            encode::write_uint(buf, *u).map_err(encode_err)?;
        }
        Value::F32(f) => encode::write_f32(buf, *f).map_err(encode_err)?,
        Value::F64(f) => encode::write_f64(buf, *f).map_err(encode_err)?,
        Value::Str(s) => encode::write_str(buf, s).map_err(encode_err)?,
        Value::Bin(b) => encode::write_bin(buf, b).map_err(encode_err)?,
        Value::Array(items) => {
            encode::write_array_len(buf, len_u32(items.len())?).map_err(encode_err)?;
            for item in items {
                write_value(buf, item)?;
            }
        }
        Value::Map(map) => write_plain_map(buf, map)?,
        Value::Ordered(map) => {
            let mut inner = Vec::with_capacity(64);
            encode::write_map_len(&mut inner, 2).map_err(encode_err)?;
            encode::write_str(&mut inner, "k").map_err(encode_err)?;
            encode::write_array_len(&mut inner, len_u32(map.len())?).map_err(encode_err)?;
            for key in map.keys() {
                encode::write_str(&mut inner, key).map_err(encode_err)?;
            }
            encode::write_str(&mut inner, "v").map_err(encode_err)?;
            encode::write_array_len(&mut inner, len_u32(map.len())?).map_err(encode_err)?;
            for val in map.values() {
                write_value(&mut inner, val)?;
            }
            encode::write_ext_meta(buf, len_u32(inner.len())?, ORDERED_MAP_EXT)
                .map_err(encode_err)?;
            buf.extend_from_slice(&inner);
        }
        Value::Ext(ty, data) => {
            encode::write_ext_meta(buf, len_u32(data.len())?, *ty).map_err(encode_err)?;
            buf.extend_from_slice(data);
        }
    }
    Ok(())
}

fn write_plain_map(buf: &mut Vec<u8>, map: &OrderedMap) -> Result<(), CodecError> {
    encode::write_map_len(buf, len_u32(map.len())?).map_err(encode_err)?;
    for (k, v) in map {
        encode::write_str(buf, k).map_err(encode_err)?;
        write_value(buf, v)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decodes exactly one value; trailing bytes are an error.
pub fn decode(data: &[u8]) -> Result<Value, CodecError> {
    let mut reader = Reader { rest: data };
    let value = reader.read_value(0)?;
    if !reader.rest.is_empty() {
        return Err(CodecError::Decode(format!("{} trailing bytes", reader.rest.len())));
    }
    Ok(value)
}

fn decode_err<E: std::fmt::Debug>(e: E) -> CodecError {
    CodecError::Decode(format!("{e:?}"))
}

/// Cursor over the undecoded tail. Markers are peeked to pick the
/// `rmp::decode` reader, which then consumes marker and payload.
struct Reader<'a> {
    rest: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: u32) -> Result<&'a [u8], CodecError> {
        let len = len as usize;
        if len > self.rest.len() {
            return Err(CodecError::Decode(format!(
                "need {len} bytes, {} left",
                self.rest.len()
            )));
        }
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        Ok(head)
    }

    fn read_value(&mut self, depth: usize) -> Result<Value, CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::Decode("nesting too deep".into()));
        }
        let first = *self
            .rest
            .first()
            .ok_or_else(|| CodecError::Decode("unexpected end of input".into()))?;
        let rd = &mut self.rest;

        let value = match Marker::from_u8(first) {
            Marker::Null => {
                decode::read_nil(rd).map_err(decode_err)?;
                Value::Nil
            }
            Marker::True | Marker::False => Value::Bool(decode::read_bool(rd).map_err(decode_err)?),
            Marker::U64 => Value::from(decode::read_u64(rd).map_err(decode_err)?),
            Marker::FixPos(_)
            | Marker::FixNeg(_)
            | Marker::U8
            | Marker::U16
            | Marker::U32
            | Marker::I8
            | Marker::I16
            | Marker::I32
            | Marker::I64 => Value::Int(decode::read_int::<i64, _>(rd).map_err(decode_err)?),
            Marker::F32 => Value::F32(decode::read_f32(rd).map_err(decode_err)?),
            Marker::F64 => Value::F64(decode::read_f64(rd).map_err(decode_err)?),
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
                let len = decode::read_str_len(rd).map_err(decode_err)?;
                let bytes = self.take(len)?;
                Value::Str(
                    String::from_utf8(bytes.to_vec())
                        .map_err(|e| CodecError::Decode(format!("invalid utf-8 string: {e}")))?,
                )
            }
            Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => {
                let len = decode::read_bin_len(rd).map_err(decode_err)?;
                Value::Bin(self.take(len)?.to_vec())
            }
            Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => {
                let len = decode::read_array_len(rd).map_err(decode_err)?;
                // cap the pre-allocation by what the input could possibly hold
                let mut items = Vec::with_capacity((len as usize).min(self.rest.len()));
                for _ in 0..len {
                    items.push(self.read_value(depth + 1)?);
                }
                Value::Array(items)
            }
            Marker::FixMap(_) | Marker::Map16 | Marker::Map32 => {
                let len = decode::read_map_len(rd).map_err(decode_err)?;
                let mut map = OrderedMap::with_capacity((len as usize).min(self.rest.len()));
                for _ in 0..len {
                    let key = map_key(self.read_value(depth + 1)?);
                    let val = self.read_value(depth + 1)?;
                    map.insert(key, val);
                }
                Value::Map(map)
            }
            Marker::FixExt1
            | Marker::FixExt2
            | Marker::FixExt4
            | Marker::FixExt8
            | Marker::FixExt16
            | Marker::Ext8
            | Marker::Ext16
            | Marker::Ext32 => {
                let meta = decode::read_ext_meta(rd).map_err(decode_err)?;
                let payload = self.take(meta.size)?;
                if meta.typeid != ORDERED_MAP_EXT {
                    return Ok(Value::Ext(meta.typeid, payload.to_vec()));
                }
                let body = Reader { rest: payload }.read_value(depth + 1)?;
                Value::Ordered(ordered_from_payload(body)?)
            }
            Marker::Reserved => {
                return Err(CodecError::Decode(format!("reserved marker {first:#x}")))
            }
        };
        Ok(value)
    }
}

/// Map keys are always strings in the decoded model.
fn map_key(key: Value) -> String {
    match key {
        Value::Str(s) => s,
        Value::Int(i) => i.to_string(),
        Value::UInt(u) => u.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::F32(f) => f.to_string(),
        Value::F64(f) => f.to_string(),
        Value::Nil => String::new(),
        other => format!("{other:?}"),
    }
}

fn ordered_from_payload(body: Value) -> Result<OrderedMap, CodecError> {
    let Value::Map(mut fields) = body else {
        return Err(CodecError::Decode(format!(
            "ordered map payload must be a map, got {}",
            body.type_name()
        )));
    };
    let keys = match fields.swap_remove("k") {
        Some(Value::Array(keys)) => keys,
        Some(Value::Nil) | None => Vec::new(),
        Some(other) => {
            return Err(CodecError::Decode(format!(
                "ordered map keys must be an array, got {}",
                other.type_name()
            )))
        }
    };
    let vals = match fields.swap_remove("v") {
        Some(Value::Array(vals)) => vals,
        Some(Value::Nil) | None => Vec::new(),
        Some(other) => {
            return Err(CodecError::Decode(format!(
                "ordered map values must be an array, got {}",
                other.type_name()
            )))
        }
    };
    if keys.len() != vals.len() {
        return Err(CodecError::Decode(format!(
            "ordered map has {} keys but {} values",
            keys.len(),
            vals.len()
        )));
    }
    Ok(keys.into_iter().map(map_key).zip(vals).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        Value::ordered([
            ("userGamedata", Value::ordered([
                ("userId", Value::Int(12345)),
                ("name", Value::from("A")),
            ])),
            ("negative", Value::Int(-70000)),
            ("big", Value::UInt(u64::MAX)),
            ("ratio", Value::F64(0.25)),
            ("small", Value::F32(1.5)),
            ("blob", Value::Bin(vec![0, 1, 2])),
            ("plain", Value::Map(
                [("x".to_string(), Value::Nil), ("a".to_string(), Value::Bool(true))]
                    .into_iter()
                    .collect(),
            )),
            ("list", Value::Array(vec![Value::Int(1), Value::from("two")])),
            ("other_ext", Value::Ext(5, vec![9, 9])),
        ])
    }

    #[test]
    fn test_roundtrip_preserves_order_and_flavour() {
        let value = sample();
        let bytes = encode(&value).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, value);

        let keys: Vec<&String> = decoded.as_map().unwrap().keys().collect();
        assert_eq!(keys[0], "userGamedata");
        assert_eq!(keys[8], "other_ext");
    }

    #[test]
    fn test_ordered_map_uses_ext_100() {
        let value = Value::ordered([("b", Value::Int(1)), ("a", Value::Int(2))]);
        let bytes = encode(&value).unwrap();
        // ext8 or fixext16 marker followed by the type byte
        match bytes[0] {
            0xc7 => assert_eq!(bytes[2] as i8, ORDERED_MAP_EXT),
            0xd8 => assert_eq!(bytes[1] as i8, ORDERED_MAP_EXT),
            other => panic!("unexpected marker {other:#x}"),
        }
    }

    #[test]
    fn test_plain_map_stays_plain() {
        let value = Value::Map([("k".to_string(), Value::Int(1))].into_iter().collect());
        let bytes = encode(&value).unwrap();
        assert_eq!(bytes[0], 0x81);
        assert!(matches!(decode(&bytes).unwrap(), Value::Map(_)));
    }

    #[test]
    fn test_other_ext_codes_are_not_ordered() {
        // fixext1, type 101, payload 0x00
        let bytes = [0xd4, 101, 0x00];
        assert_eq!(decode(&bytes).unwrap(), Value::Ext(101, vec![0]));
    }

    #[test]
    fn test_truncated_input_fails() {
        let bytes = encode(&sample()).unwrap();
        assert!(decode(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn test_malformed_markers_fail() {
        // reserved marker
        assert!(decode(&[0xc1]).is_err());
        // str8 claiming 10 bytes with one present
        assert!(decode(&[0xd9, 10, b'a']).is_err());
        // fixext4 of type 100 with a non-map payload
        assert!(decode(&[0xd6, 100, 0x01, 0x02, 0x03, 0x04]).is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_trailing_bytes_fail() {
        let mut bytes = encode(&Value::Int(1)).unwrap();
        bytes.push(0xc0);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn test_mismatched_ordered_payload_fails() {
        let mut inner = Vec::new();
        encode::write_map_len(&mut inner, 2).unwrap();
        encode::write_str(&mut inner, "k").unwrap();
        encode::write_array_len(&mut inner, 1).unwrap();
        encode::write_str(&mut inner, "a").unwrap();
        encode::write_str(&mut inner, "v").unwrap();
        encode::write_array_len(&mut inner, 0).unwrap();
        let mut bytes = Vec::new();
        encode::write_ext_meta(&mut bytes, inner.len() as u32, ORDERED_MAP_EXT).unwrap();
        bytes.extend_from_slice(&inner);
        assert!(decode(&bytes).is_err());
    }
}
