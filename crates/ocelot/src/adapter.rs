//! The type adapter: converting host (JSON) values to and from CEL values.
//!
//! JSON is the interchange form for activations and results. The mappings
//! are the natural ones; the few CEL kinds with no JSON counterpart
//! serialize to tagged strings on output and are not accepted on input.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose};

use crate::{
    error::RuntimeError,
    value::{MapKey, MapValue, Value, format_duration},
};

/// Converts a host JSON value to a CEL value.
///
/// Integers in `i64` range become `int`; larger positive integers become
/// `uint`; all other numbers become `double`. Objects become insertion-
/// ordered maps with string keys.
pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::Uint(u)
            } else {
                Value::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::string(s.as_str()),
        serde_json::Value::Array(items) => Value::list(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(entries) => {
            let map: MapValue = entries
                .iter()
                .map(|(key, value)| (MapKey::String(Arc::from(key.as_str())), json_to_value(value)))
                .collect();
            Value::map(map)
        }
    }
}

/// Converts a CEL value to JSON.
///
/// Bytes render as base64 strings, timestamps as RFC 3339 strings, and
/// durations as their decimal-seconds form. Errors and unknowns do not
/// serialize.
pub fn value_to_json(value: &Value) -> Result<serde_json::Value, RuntimeError> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Uint(u) => serde_json::Value::from(*u),
        Value::Double(d) => serde_json::Number::from_f64(*d)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::String(s) => serde_json::Value::from(s.as_ref()),
        Value::Bytes(b) => serde_json::Value::from(general_purpose::STANDARD.encode(b)),
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                out.push(value_to_json(item)?);
            }
            serde_json::Value::Array(out)
        }
        Value::Map(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map.iter() {
                let key = match key {
                    MapKey::String(s) => s.to_string(),
                    other => other.to_string(),
                };
                out.insert(key, value_to_json(value)?);
            }
            serde_json::Value::Object(out)
        }
        Value::Type(name) => serde_json::Value::from(name.as_ref()),
        Value::Duration(d) => serde_json::Value::from(format_duration(*d)),
        Value::Timestamp(t) => {
            serde_json::Value::from(t.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
        }
        Value::Struct(s) => {
            let mut out = serde_json::Map::with_capacity(s.fields.len());
            for (name, value) in &s.fields {
                out.insert(name.clone(), value_to_json(value)?);
            }
            serde_json::Value::Object(out)
        }
        Value::Enum(_, n) => serde_json::Value::from(*n),
        Value::Optional(inner) => match inner.as_ref() {
            Some(inner) => value_to_json(inner)?,
            None => serde_json::Value::Null,
        },
        Value::Error(err) => {
            return Err(RuntimeError::conversion(format!(
                "error values do not serialize: {err}"
            )));
        }
        Value::Unknown(_) => {
            return Err(RuntimeError::conversion("unknown values do not serialize"));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_preserves_order() {
        let json: serde_json::Value = serde_json::from_str(r#"{"z": 1, "a": [true, null, 2.5]}"#).unwrap();
        let value = json_to_value(&json);
        let back = value_to_json(&value).unwrap();
        assert_eq!(json, back);
        // preserve_order keeps "z" before "a".
        let Value::Map(map) = &value else { panic!("expected map") };
        let keys: Vec<String> = map.keys().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["\"z\"", "\"a\""]);
    }

    #[test]
    fn numbers_pick_the_narrowest_kind() {
        let json: serde_json::Value = serde_json::from_str("[1, 18446744073709551615, 0.5]").unwrap();
        let Value::List(items) = json_to_value(&json) else {
            panic!("expected list");
        };
        assert!(matches!(items[0], Value::Int(1)));
        assert!(matches!(items[1], Value::Uint(u) if u == u64::MAX));
        assert!(matches!(items[2], Value::Double(d) if d == 0.5));
    }

    #[test]
    fn bytes_serialize_as_base64() {
        let json = value_to_json(&Value::bytes(b"ok".to_vec())).unwrap();
        assert_eq!(json, serde_json::Value::from("b2s="));
    }
}
