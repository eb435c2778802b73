use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deskcore::buffer_json;
use deskcore::store::error::{Result, StoreError};
use deskcore::store::traits::*;
use log::{debug, warn};
use rand::RngCore;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Durable backend laid out as one JSON file per record:
///
/// ```text
/// <root>/keys/<session>/<type>/<id>.json
/// <root>/sessions/<session>.json
/// <root>/out_of_ticket/<id>.json
/// ```
///
/// Every write lands in a temporary file that is renamed over the target, so a crash leaves
/// either the old or the new value.
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    pub async fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let store = Self {
            base_path: path.into(),
        };

        fs::create_dir_all(store.path_for("keys")).await?;
        fs::create_dir_all(store.path_for("sessions")).await?;
        fs::create_dir_all(store.path_for("out_of_ticket")).await?;

        Ok(store)
    }

    fn path_for(&self, sub: &str) -> PathBuf {
        self.base_path.join(sub)
    }

    /// Percent-escapes everything outside `[A-Za-z0-9_-]`, so names never collide and never
    /// resolve outside their directory.
    fn sanitize_filename(key: &str) -> String {
        let mut out = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                out.push(byte as char);
            } else {
                out.push_str(&format!("%{byte:02X}"));
            }
        }
        if out.is_empty() {
            out.push_str("%00");
        }
        out
    }

    fn record_file(dir: PathBuf, name: &str) -> PathBuf {
        dir.join(format!("{}.json", Self::sanitize_filename(name)))
    }

    fn key_path(&self, session_id: &str, key_type: &str, key_id: &str) -> PathBuf {
        let dir = self
            .path_for("keys")
            .join(Self::sanitize_filename(session_id))
            .join(Self::sanitize_filename(key_type));
        Self::record_file(dir, key_id)
    }

    fn snapshot_path(&self, session_id: &str) -> PathBuf {
        Self::record_file(self.path_for("sessions"), session_id)
    }

    fn out_of_ticket_path(&self, id: &str) -> PathBuf {
        Self::record_file(self.path_for("out_of_ticket"), id)
    }

    async fn read_text(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write_atomic(&self, path: &Path, contents: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut suffix = [0u8; 6];
        rand::rng().fill_bytes(&mut suffix);
        let tmp = path.with_extension(format!("tmp-{}", hex::encode(suffix)));

        fs::write(&tmp, contents).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::Io(e));
        }
        Ok(())
    }

    async fn remove_if_present(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[async_trait]
impl KeyStore for FileStore {
    async fn get_key(
        &self,
        session_id: &str,
        key_type: &str,
        key_id: &str,
    ) -> Result<Option<Value>> {
        let path = self.key_path(session_id, key_type, key_id);
        match self.read_text(&path).await? {
            Some(text) => Ok(Some(buffer_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set_key(
        &self,
        session_id: &str,
        key_type: &str,
        key_id: &str,
        value: &Value,
    ) -> Result<()> {
        let text = buffer_json::to_string(value)?;
        self.write_atomic(&self.key_path(session_id, key_type, key_id), &text)
            .await
    }

    async fn delete_key(&self, session_id: &str, key_type: &str, key_id: &str) -> Result<()> {
        self.remove_if_present(&self.key_path(session_id, key_type, key_id))
            .await
    }
}

#[async_trait]
impl SnapshotStore for FileStore {
    async fn load_snapshot(&self, session_id: &str) -> Result<Option<String>> {
        self.read_text(&self.snapshot_path(session_id)).await
    }

    async fn save_snapshot(&self, session_id: &str, snapshot: &str) -> Result<()> {
        self.write_atomic(&self.snapshot_path(session_id), snapshot)
            .await
    }
}

#[async_trait]
impl OutOfTicketStore for FileStore {
    async fn put_out_of_ticket(&self, message: &OutOfTicketMessage) -> Result<()> {
        let text = buffer_json::to_string(message)?;
        self.write_atomic(&self.out_of_ticket_path(&message.id), &text)
            .await
    }

    async fn get_out_of_ticket(&self, id: &str) -> Result<Option<OutOfTicketMessage>> {
        match self.read_text(&self.out_of_ticket_path(id)).await? {
            Some(text) => Ok(Some(buffer_json::from_str_typed(&text)?)),
            None => Ok(None),
        }
    }

    async fn purge_out_of_ticket_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut purged = 0;
        let mut entries = fs::read_dir(self.path_for("out_of_ticket")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = match self.read_text(&path).await {
                Ok(Some(text)) => text,
                Ok(None) => continue,
                Err(e) => {
                    warn!(target: "FileStore", "Skipping unreadable record {}: {e}", path.display());
                    continue;
                }
            };
            match buffer_json::from_str_typed::<OutOfTicketMessage>(&text) {
                Ok(message) if message.created_at < cutoff => {
                    match self.remove_if_present(&path).await {
                        Ok(()) => purged += 1,
                        Err(e) => {
                            warn!(target: "FileStore", "Failed to purge {}: {e}", path.display())
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(target: "FileStore", "Skipping malformed record {}: {e}", path.display())
                }
            }
        }
        debug!(target: "FileStore", "Purged {purged} out-of-ticket records");
        Ok(purged)
    }
}
