//! Bounded polling of an external confirmation, such as a payment gateway charge.

use crate::realtime::Realtime;
use async_trait::async_trait;
use deskcore::channel::{Channel, Scope, TenantId};
use deskcore::poll::{ConfirmationStatus, PollOutcome, PollPolicy};
use log::{debug, error, info, warn};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub const PAYMENT_EVENT: &str = "payment";

#[async_trait]
pub trait ConfirmationSource: Send + Sync {
    async fn check(&self, reference: &str) -> anyhow::Result<ConfirmationStatus>;
}

/// Moves the resource to its terminal state once polling gives up.
#[async_trait]
pub trait ExpiryAction: Send + Sync {
    async fn expire(&self, reference: &str) -> anyhow::Result<()>;
}

pub struct ConfirmationPoller {
    policy: PollPolicy,
    source: Arc<dyn ConfirmationSource>,
    expiry: Arc<dyn ExpiryAction>,
    realtime: Realtime,
}

impl ConfirmationPoller {
    pub fn new(
        policy: PollPolicy,
        source: Arc<dyn ConfirmationSource>,
        expiry: Arc<dyn ExpiryAction>,
        realtime: Realtime,
    ) -> Self {
        Self {
            policy,
            source,
            expiry,
            realtime,
        }
    }

    /// Waits one interval before each check. A failed check counts as an attempt.
    pub async fn run(&self, tenant_id: TenantId, reference: &str) -> PollOutcome {
        for attempt in 1..=self.policy.max_attempts {
            tokio::time::sleep(self.policy.interval).await;

            match self.source.check(reference).await {
                Ok(ConfirmationStatus::Approved) => {
                    info!(target: "Poller", "{reference} confirmed on attempt {attempt}");
                    self.notify(tenant_id, reference, "confirmed").await;
                    return PollOutcome::Confirmed { attempts: attempt };
                }
                Ok(ConfirmationStatus::Pending) => {
                    debug!(
                        target: "Poller",
                        "{reference} still pending ({attempt}/{})",
                        self.policy.max_attempts
                    );
                }
                Err(e) => {
                    warn!(
                        target: "Poller",
                        "Check {attempt}/{} for {reference} failed: {e:#}",
                        self.policy.max_attempts
                    );
                }
            }
        }

        info!(
            target: "Poller",
            "{reference} not confirmed after {} attempts, expiring",
            self.policy.max_attempts
        );
        if let Err(e) = self.expiry.expire(reference).await {
            error!(target: "Poller", "Failed to expire {reference}: {e:#}");
        }
        self.notify(tenant_id, reference, "expired").await;
        PollOutcome::Expired {
            attempts: self.policy.max_attempts,
        }
    }

    pub fn spawn(self: Arc<Self>, tenant_id: TenantId, reference: String) -> JoinHandle<PollOutcome> {
        tokio::spawn(async move { self.run(tenant_id, &reference).await })
    }

    async fn notify(&self, tenant_id: TenantId, reference: &str, action: &str) {
        let room = Channel::Notification(Scope::Tenant(tenant_id));
        let payload = json!({ "action": action, "reference": reference });
        if let Err(e) = self.realtime.emit(&room, PAYMENT_EVENT, payload).await {
            warn!(target: "Poller", "Failed to announce {action} for {reference}: {e}");
        }
    }
}
