use super::{ConnectionId, CounterManager, Edge, Realtime, RealtimeError};
use crate::settings::{GROUP_CONVERSATIONS, TenantSettings, is_enabled};
use async_trait::async_trait;
use deskcore::channel::{
    AccessContext, Channel, SubscriptionRequest, TicketAccess, TicketId, Viewer, authorize,
};
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Looks up who a ticket belongs to.
#[async_trait]
pub trait TicketDirectory: Send + Sync {
    async fn ticket_access(&self, ticket_id: TicketId) -> anyhow::Result<Option<TicketAccess>>;
}

/// Subscription state for one realtime connection.
///
/// Requests from a connection are applied in call order: the counter lock is held across the
/// transport call so a join and the leave after it cannot swap.
pub struct ViewerSession {
    connection: ConnectionId,
    viewer: Viewer,
    realtime: Realtime,
    tickets: Arc<dyn TicketDirectory>,
    settings: Arc<dyn TenantSettings>,
    counters: Mutex<CounterManager<Channel>>,
    closed: AtomicBool,
}

impl ViewerSession {
    pub fn new(
        connection: ConnectionId,
        viewer: Viewer,
        realtime: Realtime,
        tickets: Arc<dyn TicketDirectory>,
        settings: Arc<dyn TenantSettings>,
    ) -> Self {
        Self {
            connection,
            viewer,
            realtime,
            tickets,
            settings,
            counters: Mutex::new(CounterManager::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub async fn count(&self, channel: &Channel) -> u32 {
        self.counters.lock().await.count(channel)
    }

    /// Subscribes to every channel the request expands to. Channels the viewer may not see are
    /// logged and skipped without an error.
    pub async fn join(&self, request: SubscriptionRequest) -> Result<(), RealtimeError> {
        if self.closed.load(Ordering::Acquire) {
            debug!(target: "Realtime/Subscriptions", "{}: join after teardown ignored", self.connection);
            return Ok(());
        }
        let transport = self.realtime.transport()?;

        let channels = self.viewer.channels_for(&request);
        if channels.is_empty() {
            warn!(
                target: "Realtime/Subscriptions",
                "{}: user {} has no channels for {request:?}",
                self.connection, self.viewer.user_id
            );
            return Ok(());
        }
        let ctx = self.access_context(&request).await;

        for channel in channels {
            if let Err(denied) = authorize(&self.viewer, &channel, &ctx) {
                warn!(
                    target: "Realtime/Subscriptions",
                    "{}: user {} denied {channel}: {denied}",
                    self.connection, self.viewer.user_id
                );
                continue;
            }

            let mut counters = self.counters.lock().await;
            // teardown may have drained while the ticket lookup was pending
            if self.closed.load(Ordering::Acquire) {
                debug!(target: "Realtime/Subscriptions", "{}: join raced teardown, dropped", self.connection);
                return Ok(());
            }
            let change = counters.increment(&channel);
            if change.edge == Some(Edge::Opened) {
                if let Err(e) = transport.join(self.connection, &channel).await {
                    counters.decrement(&channel);
                    return Err(e);
                }
                debug!(target: "Realtime/Subscriptions", "{} joined {channel}", self.connection);
            }
        }
        Ok(())
    }

    pub async fn leave(&self, request: SubscriptionRequest) -> Result<(), RealtimeError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let transport = self.realtime.transport()?;

        for channel in self.viewer.channels_for(&request) {
            let mut counters = self.counters.lock().await;
            if self.closed.load(Ordering::Acquire) {
                return Ok(());
            }
            if counters.decrement(&channel).edge == Some(Edge::Closed) {
                transport.leave(self.connection, &channel).await?;
                debug!(target: "Realtime/Subscriptions", "{} left {channel}", self.connection);
            }
        }
        Ok(())
    }

    /// Releases every channel still held. Later calls, and later joins, do nothing.
    pub async fn teardown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let held = self.counters.lock().await.drain();
        if held.is_empty() {
            return;
        }

        let transport = match self.realtime.transport() {
            Ok(t) => t,
            Err(e) => {
                warn!(target: "Realtime/Subscriptions", "{}: teardown skipped: {e}", self.connection);
                return;
            }
        };
        for (channel, _) in &held {
            if let Err(e) = transport.leave(self.connection, channel).await {
                warn!(target: "Realtime/Subscriptions", "{}: failed to leave {channel}: {e}", self.connection);
            }
        }
        debug!(
            target: "Realtime/Subscriptions",
            "{} torn down, released {} channels",
            self.connection,
            held.len()
        );
    }

    async fn access_context(&self, request: &SubscriptionRequest) -> AccessContext {
        let SubscriptionRequest::Ticket(ticket_id) = *request else {
            return AccessContext::default();
        };

        let ticket = match self.tickets.ticket_access(ticket_id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(target: "Realtime/Subscriptions", "Lookup of ticket {ticket_id} failed: {e}");
                None
            }
        };
        AccessContext {
            ticket,
            group_conversations: is_enabled(
                self.settings.as_ref(),
                self.viewer.tenant_id,
                GROUP_CONVERSATIONS,
            )
            .await,
        }
    }
}
