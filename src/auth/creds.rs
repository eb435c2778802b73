use deskcore::buffer_json::{self, CodecError};
use deskcore::creds::{Credentials, SessionSnapshot, legacy_bucket_key_type};
use deskcore::crypto::CryptoError;
use deskcore::store::{KeyStore, SnapshotStore, StoreError};
use log::{debug, error, info, warn};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("failed to read the session snapshot: {0}")]
    Store(#[from] StoreError),
    #[error("session snapshot is corrupt: {0}")]
    Corrupt(#[from] CodecError),
    #[error("failed to initialize credentials: {0}")]
    Init(#[from] CryptoError),
}

/// How a session's credentials came to be in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotLoad {
    /// Nothing was persisted; fresh credentials were generated.
    Fresh,
    Restored,
    /// The snapshot still carried legacy keys. They were moved to the key store where it had
    /// no value for them yet, and the snapshot was rewritten without them.
    Migrated { salvaged: usize, dropped: usize },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MigrationReport {
    pub salvaged: usize,
    pub dropped: usize,
}

/// Moves the legacy per-key map out of a snapshot. Keys already present in the key store win
/// over their legacy copies.
pub async fn migrate_legacy_keys(
    session_id: &str,
    legacy_keys: Map<String, Value>,
    keys: &dyn KeyStore,
) -> MigrationReport {
    let mut report = MigrationReport::default();

    for (bucket, entries) in legacy_keys {
        let Value::Object(entries) = entries else {
            if !entries.is_null() {
                report.dropped += 1;
            }
            continue;
        };
        let Some(key_type) = legacy_bucket_key_type(&bucket) else {
            warn!(
                target: "Auth/Creds",
                "Session {session_id}: dropping {} keys from unknown legacy bucket '{bucket}'",
                entries.len()
            );
            report.dropped += entries.len();
            continue;
        };

        for (key_id, value) in entries {
            if value.is_null() {
                continue;
            }
            match keys.get_key(session_id, key_type, &key_id).await {
                Ok(Some(_)) => report.dropped += 1,
                Ok(None) => match keys.set_key(session_id, key_type, &key_id, &value).await {
                    Ok(()) => report.salvaged += 1,
                    Err(e) => {
                        warn!(target: "Auth/Creds", "Session {session_id}: failed to move legacy {key_type}/{key_id}: {e}");
                        report.dropped += 1;
                    }
                },
                Err(e) => {
                    warn!(target: "Auth/Creds", "Session {session_id}: failed to check {key_type}/{key_id}: {e}");
                    report.dropped += 1;
                }
            }
        }
    }

    report
}

/// The single mutable credentials object of a session, with an explicit save.
pub struct CredentialCache<C> {
    session_id: String,
    snapshots: Arc<dyn SnapshotStore>,
    creds: Arc<RwLock<C>>,
    last_saved: Mutex<Option<String>>,
}

impl<C: Credentials> CredentialCache<C> {
    pub async fn load(
        session_id: &str,
        snapshots: Arc<dyn SnapshotStore>,
        keys: &dyn KeyStore,
    ) -> Result<(Self, SnapshotLoad), CredentialsError> {
        let persisted = snapshots.load_snapshot(session_id).await?;

        let (creds, outcome, last_saved) = match persisted {
            None => {
                debug!(target: "Auth/Creds", "Session {session_id}: no snapshot, generating credentials");
                (C::initialize()?, SnapshotLoad::Fresh, None)
            }
            Some(text) => {
                let snapshot: SessionSnapshot<C> = buffer_json::from_str_typed(&text)?;
                if snapshot.legacy_key_count() == 0 {
                    (snapshot.credentials, SnapshotLoad::Restored, Some(text))
                } else {
                    let report =
                        migrate_legacy_keys(session_id, snapshot.legacy_keys, keys).await;
                    info!(
                        target: "Auth/Creds",
                        "Session {session_id}: migrated legacy snapshot ({} keys moved, {} dropped)",
                        report.salvaged,
                        report.dropped
                    );
                    (
                        snapshot.credentials,
                        SnapshotLoad::Migrated {
                            salvaged: report.salvaged,
                            dropped: report.dropped,
                        },
                        None,
                    )
                }
            }
        };

        let cache = Self {
            session_id: session_id.to_string(),
            snapshots,
            creds: Arc::new(RwLock::new(creds)),
            last_saved: Mutex::new(last_saved),
        };

        if matches!(outcome, SnapshotLoad::Migrated { .. }) && !cache.save().await {
            warn!(target: "Auth/Creds", "Session {session_id}: migrated snapshot not written back yet");
        }

        Ok((cache, outcome))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The live credentials. Callers mutate them in place and call [`Self::save`] to persist.
    pub fn creds(&self) -> Arc<RwLock<C>> {
        self.creds.clone()
    }

    /// Persists the current credentials with an empty legacy key map. Returns `false` when the
    /// write failed; the failure is logged and the in-memory state is kept.
    pub async fn save(&self) -> bool {
        let text = {
            let creds = self.creds.read().await;
            let snapshot = SessionSnapshot {
                credentials: &*creds,
                legacy_keys: Map::new(),
            };
            match buffer_json::to_string(&snapshot) {
                Ok(text) => text,
                Err(e) => {
                    error!(target: "Auth/Creds", "Session {}: failed to serialize credentials: {e}", self.session_id);
                    return false;
                }
            }
        };

        let mut last_saved = self.last_saved.lock().await;
        if last_saved.as_deref() == Some(text.as_str()) {
            debug!(target: "Auth/Creds", "Session {}: credentials unchanged, skipping save", self.session_id);
            return true;
        }

        match self.snapshots.save_snapshot(&self.session_id, &text).await {
            Ok(()) => {
                debug!(target: "Auth/Creds", "Session {}: credentials saved", self.session_id);
                *last_saved = Some(text);
                true
            }
            Err(e) => {
                error!(target: "Auth/Creds", "Session {}: failed to save credentials: {e}", self.session_id);
                false
            }
        }
    }
}
