//! The live protocol connections messages are sent through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use deskcore::media::MediaOptions;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Reference to the message being replied to, matched by chat and message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotedRef {
    pub remote_jid: String,
    pub id: String,
    #[serde(default)]
    pub from_me: bool,
}

/// A message as handed to the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireContent {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quoted: Option<QuotedRef>,
    },
    Media(MediaOptions),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub id: String,
    pub remote_jid: String,
    pub from_me: bool,
    pub timestamp: DateTime<Utc>,
    pub content: WireContent,
}

#[async_trait]
pub trait WaConnection: Send + Sync {
    async fn send_message(&self, jid: &str, content: &WireContent)
    -> anyhow::Result<SentMessage>;
}

/// Live connections by session id.
#[derive(Default)]
pub struct Connections {
    sessions: DashMap<String, Arc<dyn WaConnection>>,
}

impl Connections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_id: impl Into<String>, connection: Arc<dyn WaConnection>) {
        self.sessions.insert(session_id.into(), connection);
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<dyn WaConnection>> {
        self.sessions.remove(session_id).map(|(_, c)| c)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<dyn WaConnection>> {
        self.sessions.get(session_id).map(|c| c.value().clone())
    }
}
