//! Signal key values and the per-key-type codecs used to move them in and out of storage.
//!
//! The protocol passes key types as open-ended strings. Each type maps to a [`KeyCodec`]; types
//! without a registered codec are stored as plain JSON.

use crate::buffer_json::CodecError;
use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub const PRE_KEY: &str = "pre-key";
pub const SESSION: &str = "session";
pub const SENDER_KEY: &str = "sender-key";
pub const SENDER_KEY_MEMORY: &str = "sender-key-memory";
pub const APP_STATE_SYNC_KEY: &str = "app-state-sync-key";
pub const APP_STATE_SYNC_VERSION: &str = "app-state-sync-version";

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateSyncKeyFingerprint {
    #[prost(uint32, optional, tag = "1")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_id: Option<u32>,
    #[prost(uint32, optional, tag = "2")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_index: Option<u32>,
    #[prost(uint32, repeated, packed = "false", tag = "3")]
    #[serde(default)]
    pub device_indexes: Vec<u32>,
}

/// Structured app-state sync key as carried by the protocol.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateSyncKeyData {
    #[prost(bytes = "vec", optional, tag = "1")]
    #[serde(default, with = "crate::buffer_json::option")]
    pub key_data: Option<Vec<u8>>,
    #[prost(message, optional, tag = "2")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<AppStateSyncKeyFingerprint>,
    #[prost(int64, optional, tag = "3")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// A decoded key value.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Json(Value),
    AppStateSyncKey(AppStateSyncKeyData),
}

impl KeyValue {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            KeyValue::Json(v) => Some(v),
            KeyValue::AppStateSyncKey(_) => None,
        }
    }
}

impl From<Value> for KeyValue {
    fn from(value: Value) -> Self {
        KeyValue::Json(value)
    }
}

pub trait KeyCodec: Send + Sync {
    fn decode(&self, key_type: &str, raw: Value) -> Result<KeyValue, CodecError>;
    fn encode(&self, key_type: &str, value: &KeyValue) -> Result<Value, CodecError>;
}

/// Stores values as they are. Structured values are written in their JSON form.
pub struct PassThroughCodec;

impl KeyCodec for PassThroughCodec {
    fn decode(&self, _key_type: &str, raw: Value) -> Result<KeyValue, CodecError> {
        Ok(KeyValue::Json(raw))
    }

    fn encode(&self, _key_type: &str, value: &KeyValue) -> Result<Value, CodecError> {
        match value {
            KeyValue::Json(v) => Ok(v.clone()),
            KeyValue::AppStateSyncKey(data) => Ok(serde_json::to_value(data)?),
        }
    }
}

/// Decodes stored JSON into [`AppStateSyncKeyData`] and checks it survives the protobuf encoding.
pub struct AppStateSyncKeyCodec;

impl KeyCodec for AppStateSyncKeyCodec {
    fn decode(&self, key_type: &str, raw: Value) -> Result<KeyValue, CodecError> {
        let data: AppStateSyncKeyData =
            serde_json::from_value(raw).map_err(|e| CodecError::KeyValue {
                key_type: key_type.to_string(),
                reason: e.to_string(),
            })?;
        let wire = data.encode_to_vec();
        let data =
            AppStateSyncKeyData::decode(wire.as_slice()).map_err(|e| CodecError::KeyValue {
                key_type: key_type.to_string(),
                reason: e.to_string(),
            })?;
        Ok(KeyValue::AppStateSyncKey(data))
    }

    fn encode(&self, key_type: &str, value: &KeyValue) -> Result<Value, CodecError> {
        match value {
            KeyValue::AppStateSyncKey(data) => Ok(serde_json::to_value(data)?),
            // Accept the JSON form too, as long as it parses as a sync key.
            KeyValue::Json(v) => match self.decode(key_type, v.clone())? {
                KeyValue::AppStateSyncKey(data) => Ok(serde_json::to_value(data)?),
                KeyValue::Json(v) => Ok(v),
            },
        }
    }
}

#[derive(Clone)]
pub struct KeyCodecRegistry {
    codecs: HashMap<String, Arc<dyn KeyCodec>>,
    fallback: Arc<dyn KeyCodec>,
}

impl Default for KeyCodecRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(APP_STATE_SYNC_KEY, Arc::new(AppStateSyncKeyCodec));
        registry
    }
}

impl KeyCodecRegistry {
    /// A registry where every key type passes through unchanged.
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
            fallback: Arc::new(PassThroughCodec),
        }
    }

    pub fn register(&mut self, key_type: impl Into<String>, codec: Arc<dyn KeyCodec>) {
        self.codecs.insert(key_type.into(), codec);
    }

    pub fn codec_for(&self, key_type: &str) -> &dyn KeyCodec {
        self.codecs
            .get(key_type)
            .map(|c| c.as_ref())
            .unwrap_or(self.fallback.as_ref())
    }

    pub fn decode(&self, key_type: &str, raw: Value) -> Result<KeyValue, CodecError> {
        self.codec_for(key_type).decode(key_type, raw)
    }

    pub fn encode(&self, key_type: &str, value: &KeyValue) -> Result<Value, CodecError> {
        self.codec_for(key_type).encode(key_type, value)
    }
}
