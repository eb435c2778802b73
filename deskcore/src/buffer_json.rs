//! JSON encoding for byte buffers embedded in otherwise plain JSON values.
//!
//! Buffers are written as `{"type":"Buffer","data":"<base64>"}`. Older writers stored `data` as an
//! array of byte values, so both forms are accepted on read and [`revive`] rewrites the array form
//! into the canonical one.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::{self, DeserializeOwned};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

const BUFFER_TAG: &str = "Buffer";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid buffer encoding: {0}")]
    Buffer(String),
    #[error("invalid value for key type '{key_type}': {reason}")]
    KeyValue { key_type: String, reason: String },
}

pub fn encode_buffer(bytes: &[u8]) -> Value {
    let mut map = Map::with_capacity(2);
    map.insert("type".to_string(), Value::String(BUFFER_TAG.to_string()));
    map.insert("data".to_string(), Value::String(STANDARD.encode(bytes)));
    Value::Object(map)
}

/// Decodes a tagged buffer. Returns `None` when `value` is not shaped like one.
pub fn decode_buffer(value: &Value) -> Option<Result<Vec<u8>, CodecError>> {
    let obj = value.as_object()?;
    if obj.get("type").and_then(Value::as_str) != Some(BUFFER_TAG) {
        return None;
    }

    let decoded = match obj.get("data").or_else(|| obj.get("value")) {
        Some(Value::String(encoded)) => STANDARD
            .decode(encoded)
            .map_err(|e| CodecError::Buffer(e.to_string())),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| CodecError::Buffer(format!("not a byte value: {item}")))
            })
            .collect(),
        _ => Err(CodecError::Buffer("missing buffer data".to_string())),
    };
    Some(decoded)
}

/// Rewrites every tagged buffer inside `value` into the canonical base64 form.
pub fn revive(value: Value) -> Result<Value, CodecError> {
    if let Some(bytes) = decode_buffer(&value) {
        return Ok(encode_buffer(&bytes?));
    }

    Ok(match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| Ok((k, revive(v)?)))
                .collect::<Result<Map<String, Value>, CodecError>>()?,
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(revive)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        other => other,
    })
}

pub fn to_string<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(value)?)
}

/// Parses persisted text and canonicalises any embedded buffers.
pub fn from_str(text: &str) -> Result<Value, CodecError> {
    revive(serde_json::from_str(text)?)
}

pub fn from_str_typed<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_value(from_str(text)?)?)
}

pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(2))?;
    map.serialize_entry("type", BUFFER_TAG)?;
    map.serialize_entry("data", &STANDARD.encode(bytes))?;
    map.end()
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match decode_buffer(&value) {
        Some(decoded) => decoded.map_err(de::Error::custom),
        None => Err(de::Error::custom("expected a tagged buffer")),
    }
}

/// `serde(with)` helpers for optional buffers; `null` and a missing field both read as `None`.
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => super::serialize(bytes, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<Value>::deserialize(deserializer)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => match decode_buffer(&value) {
                Some(decoded) => decoded.map(Some).map_err(de::Error::custom),
                None => Err(de::Error::custom("expected a tagged buffer")),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "crate::buffer_json")]
        raw: Vec<u8>,
        #[serde(default, with = "crate::buffer_json::option")]
        maybe: Option<Vec<u8>>,
    }

    #[test]
    fn typed_fields_use_tagged_form() {
        let holder = Holder {
            raw: vec![1, 2, 3],
            maybe: None,
        };
        let value = serde_json::to_value(&holder).unwrap();
        assert_eq!(value["raw"], json!({"type": "Buffer", "data": "AQID"}));
        assert!(value["maybe"].is_null());

        let back: Holder = serde_json::from_value(value).unwrap();
        assert_eq!(back, holder);
    }

    #[test]
    fn array_form_is_accepted_and_canonicalised() {
        let text = r#"{"nested":{"key":{"type":"Buffer","data":[1,2,3]}},"plain":[1,2,3]}"#;
        let value = from_str(text).unwrap();
        assert_eq!(value["nested"]["key"], json!({"type": "Buffer", "data": "AQID"}));
        // Arrays that are not tagged buffers are left alone.
        assert_eq!(value["plain"], json!([1, 2, 3]));

        let holder: Holder =
            from_str_typed(r#"{"raw":{"type":"Buffer","data":[255]}}"#).unwrap();
        assert_eq!(holder.raw, vec![255]);
        assert_eq!(holder.maybe, None);
    }

    #[test]
    fn malformed_buffers_are_rejected() {
        assert!(from_str(r#"{"type":"Buffer","data":[256]}"#).is_err());
        assert!(from_str(r#"{"type":"Buffer","data":"@@not-base64@@"}"#).is_err());
        assert!(from_str(r#"{"type":"Buffer"}"#).is_err());
        // Same shape with a different tag is plain data.
        assert!(from_str(r#"{"type":"Other","data":[256]}"#).is_ok());
    }
}
