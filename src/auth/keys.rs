use deskcore::keys::{KeyCodecRegistry, KeyValue};
use deskcore::store::{KeyStore, StoreError};
use futures_util::future::join_all;
use log::{debug, error, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Writes for one `set` call: key type, then key id, then the new value. `None` (or a JSON
/// `null`) revokes the key. Other falsy JSON such as `false`, `0` or `""` is a real value and is
/// stored as given.
pub type KeyBatch = HashMap<String, HashMap<String, Option<KeyValue>>>;

/// Signal key access for one session, in the shape the protocol layer calls it.
#[derive(Clone)]
pub struct SignalKeyStore {
    session_id: String,
    store: Arc<dyn KeyStore>,
    codecs: Arc<KeyCodecRegistry>,
}

impl SignalKeyStore {
    pub fn new(
        session_id: impl Into<String>,
        store: Arc<dyn KeyStore>,
        codecs: Arc<KeyCodecRegistry>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            store,
            codecs,
        }
    }

    /// Fetches the given ids. Missing ids, and ids whose value fails to load or decode, are
    /// absent from the result.
    pub async fn get(&self, key_type: &str, ids: &[String]) -> HashMap<String, KeyValue> {
        let raw = self.store.get_keys(&self.session_id, key_type, ids).await;
        raw.into_iter()
            .filter_map(|(id, value)| match self.codecs.decode(key_type, value) {
                Ok(decoded) => Some((id, decoded)),
                Err(e) => {
                    warn!(
                        target: "Auth/Keys",
                        "Session {}: discarding undecodable {key_type}/{id}: {e}",
                        self.session_id
                    );
                    None
                }
            })
            .collect()
    }

    /// Applies every write in the batch concurrently and waits for all of them. The first
    /// error is returned once every write has finished.
    pub async fn set(&self, batch: KeyBatch) -> Result<(), StoreError> {
        let writes = batch.iter().flat_map(|(key_type, entries)| {
            entries
                .iter()
                .map(move |(id, value)| self.apply(key_type, id, value.as_ref()))
        });
        let results = join_all(writes).await;

        let total = results.len();
        let mut failed = 0;
        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                failed += 1;
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            None => {
                debug!(target: "Auth/Keys", "Session {}: applied {total} key writes", self.session_id);
                Ok(())
            }
            Some(e) => {
                error!(
                    target: "Auth/Keys",
                    "Session {}: {failed}/{total} key writes failed, first: {e}",
                    self.session_id
                );
                Err(e)
            }
        }
    }

    async fn apply(
        &self,
        key_type: &str,
        id: &str,
        value: Option<&KeyValue>,
    ) -> Result<(), StoreError> {
        match value {
            None | Some(KeyValue::Json(Value::Null)) => {
                self.store.delete_key(&self.session_id, key_type, id).await
            }
            Some(value) => {
                let encoded = self.codecs.encode(key_type, value)?;
                self.store
                    .set_key(&self.session_id, key_type, id, &encoded)
                    .await
            }
        }
    }
}
