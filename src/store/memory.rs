use crate::store::generic::GenericMemoryStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deskcore::buffer_json;
use deskcore::store::error::Result;
use deskcore::store::traits::*;
use serde_json::Value;

type KeyMap = GenericMemoryStore<(String, String, String), String>;
type SnapshotMap = GenericMemoryStore<String, String>;
type OutOfTicketMap = GenericMemoryStore<String, OutOfTicketMessage>;

/// Non-durable backend. Keys and snapshots are held as serialized text so values go through
/// the same encoding as on disk.
#[derive(Default)]
pub struct MemoryStore {
    keys: KeyMap,
    snapshots: SnapshotMap,
    out_of_ticket: OutOfTicketMap,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn key_count(&self) -> usize {
        self.keys.len().await
    }

    fn key_address(session_id: &str, key_type: &str, key_id: &str) -> (String, String, String) {
        (
            session_id.to_string(),
            key_type.to_string(),
            key_id.to_string(),
        )
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn get_key(
        &self,
        session_id: &str,
        key_type: &str,
        key_id: &str,
    ) -> Result<Option<Value>> {
        match self
            .keys
            .get(&Self::key_address(session_id, key_type, key_id))
            .await
        {
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
        self.keys
            .put(Self::key_address(session_id, key_type, key_id), text)
            .await;
        Ok(())
    }

    async fn delete_key(&self, session_id: &str, key_type: &str, key_id: &str) -> Result<()> {
        self.keys
            .remove(&Self::key_address(session_id, key_type, key_id))
            .await;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load_snapshot(&self, session_id: &str) -> Result<Option<String>> {
        Ok(self.snapshots.get(&session_id.to_string()).await)
    }

    async fn save_snapshot(&self, session_id: &str, snapshot: &str) -> Result<()> {
        self.snapshots
            .put(session_id.to_string(), snapshot.to_string())
            .await;
        Ok(())
    }
}

#[async_trait]
impl OutOfTicketStore for MemoryStore {
    async fn put_out_of_ticket(&self, message: &OutOfTicketMessage) -> Result<()> {
        self.out_of_ticket
            .put(message.id.clone(), message.clone())
            .await;
        Ok(())
    }

    async fn get_out_of_ticket(&self, id: &str) -> Result<Option<OutOfTicketMessage>> {
        Ok(self.out_of_ticket.get(&id.to_string()).await)
    }

    async fn purge_out_of_ticket_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        Ok(self
            .out_of_ticket
            .retain_where(|_, message| message.created_at >= cutoff)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serde_json::json;

    #[tokio::test]
    async fn set_get_delete_round_trip() {
        let store = MemoryStore::new();
        store
            .set_key("sess1", "pre-key", "5", &json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(
            store.get_key("sess1", "pre-key", "5").await.unwrap(),
            Some(json!({"x": 1}))
        );

        store.delete_key("sess1", "pre-key", "5").await.unwrap();
        assert_eq!(store.get_key("sess1", "pre-key", "5").await.unwrap(), None);
        // Deleting again is fine.
        store.delete_key("sess1", "pre-key", "5").await.unwrap();
    }

    #[tokio::test]
    async fn keys_are_scoped_by_session_and_type() {
        let store = MemoryStore::new();
        store
            .set_key("a", "session", "1", &json!("a-session"))
            .await
            .unwrap();
        store
            .set_key("a", "pre-key", "1", &json!("a-prekey"))
            .await
            .unwrap();
        store
            .set_key("a", "session", "1", &json!("a-session-2"))
            .await
            .unwrap();

        assert_eq!(store.key_count().await, 2);
        assert_eq!(store.get_key("b", "session", "1").await.unwrap(), None);
        assert_eq!(
            store.get_key("a", "session", "1").await.unwrap(),
            Some(json!("a-session-2"))
        );
    }

    #[tokio::test]
    async fn bulk_get_omits_missing_ids() {
        let store = MemoryStore::new();
        store.set_key("s", "pre-key", "1", &json!(1)).await.unwrap();
        store.set_key("s", "pre-key", "3", &json!(3)).await.unwrap();

        let ids: Vec<String> = ["1", "2", "3"].iter().map(|s| s.to_string()).collect();
        let found = store.get_keys("s", "pre-key", &ids).await;
        assert_eq!(found.len(), 2);
        assert_eq!(found["1"], json!(1));
        assert_eq!(found["3"], json!(3));
        assert!(!found.contains_key("2"));
    }

    #[tokio::test]
    async fn purge_drops_only_old_records() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for (id, age_hours) in [("old", 30), ("fresh", 1)] {
            store
                .put_out_of_ticket(&OutOfTicketMessage {
                    id: id.to_string(),
                    payload: json!({"id": id}),
                    session_id: "s".to_string(),
                    created_at: now - TimeDelta::hours(age_hours),
                })
                .await
                .unwrap();
        }

        let purged = store
            .purge_out_of_ticket_before(now - TimeDelta::hours(24))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_out_of_ticket("old").await.unwrap().is_none());
        assert!(store.get_out_of_ticket("fresh").await.unwrap().is_some());
    }
}
