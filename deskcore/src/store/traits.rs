use crate::store::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Signal keys, addressed by `(session, key type, key id)`. Writes are upserts.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get_key(&self, session_id: &str, key_type: &str, key_id: &str)
    -> Result<Option<Value>>;
    async fn set_key(
        &self,
        session_id: &str,
        key_type: &str,
        key_id: &str,
        value: &Value,
    ) -> Result<()>;
    /// Deleting a key that does not exist is not an error.
    async fn delete_key(&self, session_id: &str, key_type: &str, key_id: &str) -> Result<()>;

    /// Looks every id up on its own. Ids that are missing or fail to load are left out of the
    /// result; a failure is logged and never affects the other ids.
    async fn get_keys(
        &self,
        session_id: &str,
        key_type: &str,
        key_ids: &[String],
    ) -> HashMap<String, Value> {
        let mut found = HashMap::with_capacity(key_ids.len());
        for key_id in key_ids {
            match self.get_key(session_id, key_type, key_id).await {
                Ok(Some(value)) => {
                    found.insert(key_id.clone(), value);
                }
                Ok(None) => {}
                Err(e) => warn!(
                    target: "Store/Keys",
                    "Failed to read {key_type}/{key_id} for session {session_id}: {e}"
                ),
            }
        }
        debug!(
            target: "Store/Keys",
            "Session {session_id}: found {}/{} {key_type} keys",
            found.len(),
            key_ids.len()
        );
        found
    }
}

/// One serialized credentials snapshot per session.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load_snapshot(&self, session_id: &str) -> Result<Option<String>>;
    async fn save_snapshot(&self, session_id: &str, snapshot: &str) -> Result<()>;
}

/// A message sent or received without a ticket to file it under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutOfTicketMessage {
    pub id: String,
    pub payload: Value,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait OutOfTicketStore: Send + Sync {
    async fn put_out_of_ticket(&self, message: &OutOfTicketMessage) -> Result<()>;
    async fn get_out_of_ticket(&self, id: &str) -> Result<Option<OutOfTicketMessage>>;
    /// Removes every record created before `cutoff` and returns how many went.
    async fn purge_out_of_ticket_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

pub trait Backend: KeyStore + SnapshotStore + OutOfTicketStore {}

impl<T> Backend for T where T: KeyStore + SnapshotStore + OutOfTicketStore {}
