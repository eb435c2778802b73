use crate::connection::Connections;
use crate::poller::{ConfirmationPoller, ConfirmationSource, ExpiryAction};
use crate::realtime::Realtime;
use crate::send::{OutboundDispatcher, TicketHistory};
use crate::settings::TenantSettings;
use crate::sweeper::{OUT_OF_TICKET_RETENTION, spawn_out_of_ticket_sweeper};
use crate::upload::LocalMediaVault;
use deskcore::media::DEFAULT_SIZE_LIMIT_MIB;
use deskcore::poll::PollPolicy;
use deskcore::store::OutOfTicketStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
pub struct DeskConfig {
    pub store_path: PathBuf,
    pub media_dir: PathBuf,
    pub public_base_url: String,
    /// Used when a tenant has no `uploadLimit` of its own.
    pub default_media_limit_mib: u64,
    pub out_of_ticket_retention: Duration,
    pub sweep_interval: Duration,
    pub payment_poll: PollPolicy,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("wadesk-store"),
            media_dir: PathBuf::from("public"),
            public_base_url: "http://localhost:8080/public".to_string(),
            default_media_limit_mib: DEFAULT_SIZE_LIMIT_MIB,
            out_of_ticket_retention: OUT_OF_TICKET_RETENTION,
            sweep_interval: Duration::from_secs(60 * 60),
            payment_poll: PollPolicy::default(),
        }
    }
}

impl DeskConfig {
    pub fn media_vault(&self) -> anyhow::Result<LocalMediaVault> {
        LocalMediaVault::new(&self.media_dir, &self.public_base_url)
    }

    /// Dispatcher whose link fallback writes into `media_dir`.
    pub fn dispatcher(
        &self,
        connections: Arc<Connections>,
        settings: Arc<dyn TenantSettings>,
        tickets: Arc<dyn TicketHistory>,
        out_of_ticket: Arc<dyn OutOfTicketStore>,
    ) -> anyhow::Result<OutboundDispatcher> {
        let vault = Arc::new(self.media_vault()?);
        Ok(OutboundDispatcher::new(connections, settings, vault, tickets, out_of_ticket)
            .with_default_limit_mib(self.default_media_limit_mib))
    }

    pub fn payment_poller(
        &self,
        source: Arc<dyn ConfirmationSource>,
        expiry: Arc<dyn ExpiryAction>,
        realtime: Realtime,
    ) -> ConfirmationPoller {
        ConfirmationPoller::new(self.payment_poll.clone(), source, expiry, realtime)
    }

    pub fn spawn_sweeper(&self, store: Arc<dyn OutOfTicketStore>) -> JoinHandle<()> {
        spawn_out_of_ticket_sweeper(store, self.out_of_ticket_retention, self.sweep_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{SentMessage, WaConnection, WireContent};
    use crate::send::{MediaAttachment, OutboundMessage};
    use crate::settings::MemorySettings;
    use crate::store::MemoryStore;
    use crate::upload::MediaVault;
    use async_trait::async_trait;
    use chrono::Utc;
    use deskcore::poll::{ConfirmationStatus, PollOutcome};
    use deskcore::store::OutOfTicketMessage;
    use serde_json::json;
    use tempfile::TempDir;

    struct Echo;

    #[async_trait]
    impl WaConnection for Echo {
        async fn send_message(
            &self,
            jid: &str,
            content: &WireContent,
        ) -> anyhow::Result<SentMessage> {
            Ok(SentMessage {
                id: "ECHO".to_string(),
                remote_jid: jid.to_string(),
                from_me: true,
                timestamp: Utc::now(),
                content: content.clone(),
            })
        }
    }

    struct NoTickets;

    #[async_trait]
    impl TicketHistory for NoTickets {
        async fn record(&self, _ticket_id: i64, _message: &SentMessage) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn config_in(dir: &TempDir) -> DeskConfig {
        DeskConfig {
            media_dir: dir.path().join("public"),
            public_base_url: "https://desk.example.com/public/".to_string(),
            default_media_limit_mib: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn vault_serves_from_the_configured_url() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let src = dir.path().join("notes.txt");
        tokio::fs::write(&src, b"hello").await.unwrap();

        let stored = config
            .media_vault()
            .unwrap()
            .store(&src, "notes.txt")
            .await
            .unwrap();

        assert!(stored.url.starts_with("https://desk.example.com/public/"));
        assert!(config.media_dir.join(&stored.stored_name).exists());
    }

    #[tokio::test]
    async fn dispatcher_uses_the_configured_default_budget() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let connections = Arc::new(Connections::new());
        connections.insert("sess1", Arc::new(Echo));
        let dispatcher = config
            .dispatcher(
                connections,
                Arc::new(MemorySettings::new()),
                Arc::new(NoTickets),
                Arc::new(MemoryStore::new()),
            )
            .unwrap();

        let path = dir.path().join("scan.pdf");
        std::fs::File::create(&path)
            .unwrap()
            .set_len(1024 * 1024 + 1)
            .unwrap();
        let sent = dispatcher
            .send(&OutboundMessage {
                tenant_id: 1,
                session_id: "sess1".to_string(),
                to: "5511999999999".to_string(),
                media: Some(MediaAttachment {
                    path,
                    file_name: None,
                }),
                ..Default::default()
            })
            .await
            .unwrap();

        match sent.content {
            WireContent::Text { text, .. } => {
                assert!(text.contains("https://desk.example.com/public/"))
            }
            other => panic!("expected a link, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_base_url_is_rejected() {
        let config = DeskConfig {
            public_base_url: String::new(),
            ..Default::default()
        };
        assert!(config.media_vault().is_err());
    }

    struct Pending;

    #[async_trait]
    impl ConfirmationSource for Pending {
        async fn check(&self, _reference: &str) -> anyhow::Result<ConfirmationStatus> {
            Ok(ConfirmationStatus::Pending)
        }
    }

    struct Expire;

    #[async_trait]
    impl ExpiryAction for Expire {
        async fn expire(&self, _reference: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poller_follows_the_configured_policy() {
        let config = DeskConfig {
            payment_poll: PollPolicy::new(3, Duration::from_secs(5)),
            ..Default::default()
        };
        let poller = config.payment_poller(Arc::new(Pending), Arc::new(Expire), Realtime::new());

        let started = tokio::time::Instant::now();
        let outcome = poller.run(1, "invoice-1").await;

        assert_eq!(outcome, PollOutcome::Expired { attempts: 3 });
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_on_the_configured_interval() {
        let store = Arc::new(MemoryStore::new());
        let config = DeskConfig {
            out_of_ticket_retention: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
            ..Default::default()
        };
        let record = |id: &str, age: chrono::Duration| OutOfTicketMessage {
            id: id.to_string(),
            payload: json!({"id": id}),
            session_id: "sess1".to_string(),
            created_at: Utc::now() - age,
        };
        store
            .put_out_of_ticket(&record("old", chrono::Duration::hours(2)))
            .await
            .unwrap();

        let handle = config.spawn_sweeper(store.clone());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(store.get_out_of_ticket("old").await.unwrap().is_none());

        store
            .put_out_of_ticket(&record("later", chrono::Duration::hours(3)))
            .await
            .unwrap();
        tokio::time::sleep(config.sweep_interval).await;
        assert!(store.get_out_of_ticket("later").await.unwrap().is_none());
        handle.abort();
    }
}
