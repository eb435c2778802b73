use crate::connection::{Connections, QuotedRef, SentMessage, WireContent};
use crate::settings::{TenantSettings, UPLOAD_LIMIT};
use crate::sweeper::OUT_OF_TICKET_RETENTION;
use crate::upload::MediaVault;
use async_trait::async_trait;
use chrono::Utc;
use deskcore::channel::{TenantId, TicketId};
use deskcore::jid::normalize_chat_address;
use deskcore::media::{
    DEFAULT_SIZE_LIMIT_MIB, oversized_media_text, resolve_media_options, size_limit_bytes_or,
};
use deskcore::store::{OutOfTicketMessage, OutOfTicketStore};
use log::{debug, info, warn};
use moka::future::Cache;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on messages waiting in [`RecentMessages`].
pub const RECENT_MESSAGE_CAPACITY: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct MediaAttachment {
    pub path: PathBuf,
    pub file_name: Option<String>,
}

/// A logical message to deliver through a session.
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub tenant_id: TenantId,
    pub session_id: String,
    pub to: String,
    pub is_group: bool,
    pub body: String,
    pub media: Option<MediaAttachment>,
    pub ptt: bool,
    /// `Some(0)` counts as no ticket.
    pub ticket_id: Option<TicketId>,
    pub quoted: Option<QuotedRef>,
}

#[derive(Debug, Error)]
pub enum SendMessageError {
    #[error("invalid target {0:?}")]
    InvalidTarget(String),
    #[error("no live connection for session {0}")]
    NoConnection(String),
    #[error("failed to read media {}", path.display())]
    MediaRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to send message to {to}: {source:#}")]
    Failed {
        to: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Ticket transcript the sent message is appended to.
#[async_trait]
pub trait TicketHistory: Send + Sync {
    async fn record(&self, ticket_id: TicketId, message: &SentMessage) -> anyhow::Result<()>;
}

/// Messages sent outside any ticket, held until something claims them. Entries expire with the
/// out-of-ticket retention and the oldest are evicted past [`RECENT_MESSAGE_CAPACITY`].
pub struct RecentMessages {
    messages: Cache<(String, String), SentMessage>,
}

impl Default for RecentMessages {
    fn default() -> Self {
        Self::with_limits(OUT_OF_TICKET_RETENTION, RECENT_MESSAGE_CAPACITY)
    }
}

impl RecentMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(time_to_live: Duration, max_capacity: u64) -> Self {
        Self {
            messages: Cache::builder()
                .time_to_live(time_to_live)
                .max_capacity(max_capacity)
                .build(),
        }
    }

    pub async fn insert(&self, message: SentMessage) {
        self.messages
            .insert((message.remote_jid.clone(), message.id.clone()), message)
            .await;
    }

    /// Removes and returns the message; a second take yields `None`.
    pub async fn take(&self, chat: &str, id: &str) -> Option<SentMessage> {
        self.messages
            .remove(&(chat.to_string(), id.to_string()))
            .await
    }

    pub async fn len(&self) -> u64 {
        self.messages.run_pending_tasks().await;
        self.messages.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

pub struct OutboundDispatcher {
    connections: Arc<Connections>,
    settings: Arc<dyn TenantSettings>,
    vault: Arc<dyn MediaVault>,
    tickets: Arc<dyn TicketHistory>,
    out_of_ticket: Arc<dyn OutOfTicketStore>,
    recent: Arc<RecentMessages>,
    default_limit_mib: u64,
}

impl OutboundDispatcher {
    pub fn new(
        connections: Arc<Connections>,
        settings: Arc<dyn TenantSettings>,
        vault: Arc<dyn MediaVault>,
        tickets: Arc<dyn TicketHistory>,
        out_of_ticket: Arc<dyn OutOfTicketStore>,
    ) -> Self {
        Self {
            connections,
            settings,
            vault,
            tickets,
            out_of_ticket,
            recent: Arc::new(RecentMessages::new()),
            default_limit_mib: DEFAULT_SIZE_LIMIT_MIB,
        }
    }

    /// Budget for tenants without a usable `uploadLimit` setting.
    pub fn with_default_limit_mib(mut self, mib: u64) -> Self {
        self.default_limit_mib = mib.max(1);
        self
    }

    pub fn recent_messages(&self) -> Arc<RecentMessages> {
        self.recent.clone()
    }

    /// Sends the message and files the result. Every failure before the send completes is
    /// reported as a [`SendMessageError`]; filing failures are only logged.
    pub async fn send(&self, message: &OutboundMessage) -> Result<SentMessage, SendMessageError> {
        let jid = normalize_chat_address(&message.to, message.is_group)
            .ok_or_else(|| SendMessageError::InvalidTarget(message.to.clone()))?;
        let sent = self.deliver(&jid, message).await?;

        self.file(message, &sent).await;
        Ok(sent)
    }

    async fn deliver(
        &self,
        jid: &str,
        message: &OutboundMessage,
    ) -> Result<SentMessage, SendMessageError> {
        let connection = self
            .connections
            .get(&message.session_id)
            .ok_or_else(|| SendMessageError::NoConnection(message.session_id.clone()))?;

        let content = match &message.media {
            Some(media) => self.media_content(jid, message, media).await?,
            None => WireContent::Text {
                text: message.body.clone(),
                quoted: message.quoted.clone(),
            },
        };

        connection
            .send_message(jid, &content)
            .await
            .map_err(|source| SendMessageError::Failed {
                to: jid.to_string(),
                source,
            })
    }

    async fn media_content(
        &self,
        jid: &str,
        message: &OutboundMessage,
        media: &MediaAttachment,
    ) -> Result<WireContent, SendMessageError> {
        let size = tokio::fs::metadata(&media.path)
            .await
            .map_err(|source| SendMessageError::MediaRead {
                path: media.path.clone(),
                source,
            })?
            .len();
        let limit = self.size_limit(message.tenant_id).await;

        let file_name = media.file_name.clone().unwrap_or_else(|| {
            media
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

        if size > limit {
            info!(
                target: "Dispatch",
                "{} is {size} bytes, over the {limit} byte budget; sending a link instead",
                media.path.display()
            );
            let stored = self
                .vault
                .store(&media.path, &file_name)
                .await
                .map_err(|source| SendMessageError::Failed {
                    to: jid.to_string(),
                    source,
                })?;
            return Ok(WireContent::Text {
                text: oversized_media_text(&message.body, &file_name, &stored.url),
                quoted: None,
            });
        }

        Ok(WireContent::Media(resolve_media_options(
            &media.path,
            Some(&message.body),
            Some(&file_name),
            message.ptt,
        )))
    }

    async fn size_limit(&self, tenant_id: TenantId) -> u64 {
        let setting = match self.settings.get_setting(tenant_id, UPLOAD_LIMIT).await {
            Ok(value) => value,
            Err(e) => {
                warn!(target: "Dispatch", "Failed to read upload limit for tenant {tenant_id}: {e}");
                None
            }
        };
        size_limit_bytes_or(setting.as_deref(), self.default_limit_mib)
    }

    async fn file(&self, message: &OutboundMessage, sent: &SentMessage) {
        match message.ticket_id.filter(|id| *id != 0) {
            Some(ticket_id) => {
                if let Err(e) = self.tickets.record(ticket_id, sent).await {
                    warn!(
                        target: "Dispatch",
                        "Sent {} but failed to record it on ticket {ticket_id}: {e:#}",
                        sent.id
                    );
                }
            }
            None => {
                self.recent.insert(sent.clone()).await;
                let record = match serde_json::to_value(sent) {
                    Ok(payload) => OutOfTicketMessage {
                        id: sent.id.clone(),
                        payload,
                        session_id: message.session_id.clone(),
                        created_at: Utc::now(),
                    },
                    Err(e) => {
                        warn!(target: "Dispatch", "Failed to serialize sent message {}: {e}", sent.id);
                        return;
                    }
                };
                match self.out_of_ticket.put_out_of_ticket(&record).await {
                    Ok(()) => debug!(target: "Dispatch", "Held {} as out-of-ticket", sent.id),
                    Err(e) => warn!(
                        target: "Dispatch",
                        "Failed to persist out-of-ticket message {}: {e}",
                        sent.id
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::WaConnection;
    use crate::settings::MemorySettings;
    use crate::store::MemoryStore;
    use crate::upload::StoredMedia;
    use deskcore::media::MediaKind;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingConnection {
        sent: Mutex<Vec<(String, WireContent)>>,
    }

    #[async_trait]
    impl WaConnection for RecordingConnection {
        async fn send_message(
            &self,
            jid: &str,
            content: &WireContent,
        ) -> anyhow::Result<SentMessage> {
            let mut sent = self.sent.lock().unwrap();
            sent.push((jid.to_string(), content.clone()));
            Ok(SentMessage {
                id: format!("MSG{}", sent.len()),
                remote_jid: jid.to_string(),
                from_me: true,
                timestamp: Utc::now(),
                content: content.clone(),
            })
        }
    }

    struct FakeVault;

    #[async_trait]
    impl MediaVault for FakeVault {
        async fn store(&self, _path: &Path, file_name: &str) -> anyhow::Result<StoredMedia> {
            Ok(StoredMedia {
                url: format!("https://files.example.com/{file_name}"),
                stored_name: file_name.to_string(),
            })
        }
    }

    #[derive(Default)]
    struct Transcript {
        entries: Mutex<Vec<(TicketId, String)>>,
    }

    #[async_trait]
    impl TicketHistory for Transcript {
        async fn record(&self, ticket_id: TicketId, message: &SentMessage) -> anyhow::Result<()> {
            self.entries
                .lock()
                .unwrap()
                .push((ticket_id, message.id.clone()));
            Ok(())
        }
    }

    struct Fixture {
        dispatcher: OutboundDispatcher,
        connection: Arc<RecordingConnection>,
        transcript: Arc<Transcript>,
        store: Arc<MemoryStore>,
        settings: Arc<MemorySettings>,
    }

    fn fixture() -> Fixture {
        let connections = Arc::new(Connections::new());
        let connection = Arc::new(RecordingConnection::default());
        connections.insert("sess1", connection.clone());
        let transcript = Arc::new(Transcript::default());
        let store = Arc::new(MemoryStore::new());
        let settings = Arc::new(MemorySettings::new());
        let dispatcher = OutboundDispatcher::new(
            connections,
            settings.clone(),
            Arc::new(FakeVault),
            transcript.clone(),
            store.clone(),
        );
        Fixture {
            dispatcher,
            connection,
            transcript,
            store,
            settings,
        }
    }

    fn text(to: &str, body: &str) -> OutboundMessage {
        OutboundMessage {
            tenant_id: 1,
            session_id: "sess1".to_string(),
            to: to.to_string(),
            body: body.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn text_reply_carries_the_quote_and_lands_on_the_ticket() {
        let f = fixture();
        let quoted = QuotedRef {
            remote_jid: "5511999999999@s.whatsapp.net".to_string(),
            id: "ABC".to_string(),
            from_me: false,
        };
        let message = OutboundMessage {
            ticket_id: Some(7),
            quoted: Some(quoted.clone()),
            ..text("55 11 99999-9999", "hello")
        };

        let sent = f.dispatcher.send(&message).await.unwrap();

        assert_eq!(sent.remote_jid, "5511999999999@s.whatsapp.net");
        assert_eq!(
            sent.content,
            WireContent::Text {
                text: "hello".to_string(),
                quoted: Some(quoted)
            }
        );
        assert_eq!(*f.transcript.entries.lock().unwrap(), vec![(7, sent.id)]);
        assert!(f.dispatcher.recent_messages().is_empty().await);
    }

    #[tokio::test]
    async fn zero_ticket_is_held_out_of_ticket() {
        let f = fixture();
        let message = OutboundMessage {
            ticket_id: Some(0),
            ..text("5511999999999", "hi")
        };

        let sent = f.dispatcher.send(&message).await.unwrap();

        assert!(f.transcript.entries.lock().unwrap().is_empty());
        let held = f.store.get_out_of_ticket(&sent.id).await.unwrap().unwrap();
        assert_eq!(held.session_id, "sess1");
        let recent = f.dispatcher.recent_messages();
        assert!(recent.take(&sent.remote_jid, &sent.id).await.is_some());
        assert!(recent.take(&sent.remote_jid, &sent.id).await.is_none());
    }

    #[tokio::test]
    async fn missing_connection_is_a_send_failure() {
        let f = fixture();
        let message = OutboundMessage {
            session_id: "gone".to_string(),
            ..text("123", "hi")
        };

        let err = f.dispatcher.send(&message).await.unwrap_err();
        assert!(matches!(&err, SendMessageError::NoConnection(s) if s == "gone"));
        assert!(err.to_string().contains("no live connection"));
        assert!(f.connection.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn target_without_digits_is_rejected_before_sending() {
        let f = fixture();

        let err = f
            .dispatcher
            .send(&text("not-a-number", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(&err, SendMessageError::InvalidTarget(t) if t == "not-a-number"));

        let err = f
            .dispatcher
            .send(&text("@s.whatsapp.net", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, SendMessageError::InvalidTarget(_)));
        assert!(f.connection.sent.lock().unwrap().is_empty());
        assert!(f.dispatcher.recent_messages().is_empty().await);
    }

    fn sent(n: usize) -> SentMessage {
        SentMessage {
            id: format!("MSG{n}"),
            remote_jid: "5511999999999@s.whatsapp.net".to_string(),
            from_me: true,
            timestamp: Utc::now(),
            content: WireContent::Text {
                text: format!("message {n}"),
                quoted: None,
            },
        }
    }

    #[tokio::test]
    async fn recent_messages_are_capped() {
        let recent = RecentMessages::with_limits(OUT_OF_TICKET_RETENTION, 5);
        for n in 0..50 {
            recent.insert(sent(n)).await;
        }
        assert!(recent.len().await <= 5);
    }

    #[tokio::test]
    async fn recent_messages_expire() {
        let recent =
            RecentMessages::with_limits(Duration::from_millis(200), RECENT_MESSAGE_CAPACITY);
        recent.insert(sent(1)).await;
        recent.insert(sent(2)).await;
        assert_eq!(recent.len().await, 2);

        std::thread::sleep(Duration::from_millis(400));
        assert!(recent.is_empty().await);
        assert!(recent.take("5511999999999@s.whatsapp.net", "MSG1").await.is_none());
    }

    #[tokio::test]
    async fn small_media_goes_out_natively() {
        let f = fixture();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.png");
        tokio::fs::write(&path, vec![0u8; 1024]).await.unwrap();
        let message = OutboundMessage {
            media: Some(MediaAttachment {
                path: path.clone(),
                file_name: None,
            }),
            ..text("120363000000000000", "look")
        };
        let message = OutboundMessage {
            is_group: true,
            ..message
        };

        let sent = f.dispatcher.send(&message).await.unwrap();

        assert_eq!(sent.remote_jid, "120363000000000000@g.us");
        match sent.content {
            WireContent::Media(options) => {
                assert_eq!(options.kind, MediaKind::Image);
                assert_eq!(options.caption.as_deref(), Some("look"));
                assert_eq!(options.path, path);
            }
            other => panic!("expected media, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn media_over_tenant_budget_degrades_to_a_link() {
        let f = fixture();
        f.settings.set(1, UPLOAD_LIMIT, "1");
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.pdf");
        tokio::fs::write(&path, vec![0u8; 2 * 1024 * 1024])
            .await
            .unwrap();
        let message = OutboundMessage {
            media: Some(MediaAttachment {
                path,
                file_name: Some("report.pdf".to_string()),
            }),
            ..text("5511999999999", "quarterly numbers")
        };

        let sent = f.dispatcher.send(&message).await.unwrap();

        match sent.content {
            WireContent::Text { text, quoted } => {
                assert!(text.starts_with("quarterly numbers"));
                assert!(text.contains("https://files.example.com/report.pdf"));
                assert!(quoted.is_none());
            }
            other => panic!("expected text fallback, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreadable_media_is_a_send_failure() {
        let f = fixture();
        let message = OutboundMessage {
            media: Some(MediaAttachment {
                path: PathBuf::from("/definitely/not/here.jpg"),
                file_name: None,
            }),
            ..text("5511999999999", "x")
        };
        let err = f.dispatcher.send(&message).await.unwrap_err();
        assert!(matches!(err, SendMessageError::MediaRead { .. }));
        assert!(f.connection.sent.lock().unwrap().is_empty());
    }
}
