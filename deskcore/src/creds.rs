//! Long-lived session identity material and the persisted snapshot that wraps it.

use crate::crypto::{CryptoError, KeyPair, SignedKeyPair, fill_random};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Credentials a protocol implementation keeps per session.
///
/// `initialize` is only called for sessions that have never been persisted.
pub trait Credentials: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn initialize() -> Result<Self, CryptoError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCreds {
    pub noise_key: KeyPair,
    pub pairing_ephemeral_key_pair: KeyPair,
    pub signed_identity_key: KeyPair,
    pub signed_pre_key: SignedKeyPair,
    pub registration_id: u16,
    pub adv_secret_key: String,
    pub next_pre_key_id: u32,
    pub first_unuploaded_pre_key_id: u32,
    pub account_sync_counter: u32,
    #[serde(default)]
    pub registered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<Contact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default)]
    pub processed_history_messages: Vec<Value>,
    /// Fields this version does not model, kept so a save never drops them.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Credentials for AuthCreds {
    fn initialize() -> Result<Self, CryptoError> {
        let signed_identity_key = KeyPair::generate()?;
        let signed_pre_key = SignedKeyPair::generate(&signed_identity_key, 1)?;

        let mut adv_secret = [0u8; 32];
        fill_random(&mut adv_secret)?;
        let mut registration = [0u8; 2];
        fill_random(&mut registration)?;

        Ok(Self {
            noise_key: KeyPair::generate()?,
            pairing_ephemeral_key_pair: KeyPair::generate()?,
            signed_identity_key,
            signed_pre_key,
            registration_id: u16::from_be_bytes(registration) & 0x3FFF,
            adv_secret_key: STANDARD.encode(adv_secret),
            next_pre_key_id: 1,
            first_unuploaded_pre_key_id: 1,
            account_sync_counter: 0,
            registered: false,
            me: None,
            platform: None,
            processed_history_messages: Vec::new(),
            extra: Map::new(),
        })
    }
}

/// Persisted form of one session's credentials.
///
/// `legacy_keys` is what older writers stored next to the credentials before keys moved to the
/// key store; it is always written empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot<C> {
    #[serde(alias = "creds")]
    pub credentials: C,
    #[serde(default, alias = "keys")]
    pub legacy_keys: Map<String, Value>,
}

impl<C> SessionSnapshot<C> {
    pub fn new(credentials: C) -> Self {
        Self {
            credentials,
            legacy_keys: Map::new(),
        }
    }

    /// Number of keys held in the legacy map, across all buckets.
    pub fn legacy_key_count(&self) -> usize {
        self.legacy_keys
            .values()
            .map(|bucket| match bucket {
                Value::Object(entries) => entries.len(),
                Value::Null => 0,
                _ => 1,
            })
            .sum()
    }
}

/// Maps a legacy snapshot bucket name to the key type it now lives under.
pub fn legacy_bucket_key_type(bucket: &str) -> Option<&'static str> {
    match bucket {
        "preKeys" => Some("pre-key"),
        "sessions" => Some("session"),
        "senderKeys" => Some("sender-key"),
        "senderKeyMemory" => Some("sender-key-memory"),
        "appStateSyncKeys" => Some("app-state-sync-key"),
        "appStateVersions" => Some("app-state-sync-version"),
        _ => None,
    }
}
