//! Realtime channels and the rules that decide who may subscribe to them.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type TenantId = i64;
pub type QueueId = i64;
pub type TicketId = i64;
pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Pending,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::Pending => "pending",
            TicketStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Tenant(TenantId),
    Queue(QueueId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Ticket(TicketId),
    Notification(Scope),
    Status { scope: Scope, status: TicketStatus },
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Ticket(id) => write!(f, "ticket-channel:{id}"),
            Channel::Notification(Scope::Tenant(id)) => write!(f, "tenant-{id}-notification"),
            Channel::Notification(Scope::Queue(id)) => write!(f, "queue-{id}-notification"),
            Channel::Status {
                scope: Scope::Tenant(id),
                status,
            } => write!(f, "tenant-{id}-{status}"),
            Channel::Status {
                scope: Scope::Queue(id),
                status,
            } => write!(f, "queue-{id}-{status}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Admin,
    User,
}

/// Identity of the user behind a realtime connection, taken from the verified session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub profile: Profile,
    pub queue_ids: Vec<QueueId>,
}

impl Viewer {
    pub fn is_admin(&self) -> bool {
        self.profile == Profile::Admin
    }

    fn in_queue(&self, queue_id: QueueId) -> bool {
        self.queue_ids.contains(&queue_id)
    }

    /// Expands a client request into the concrete channels this viewer would join.
    pub fn channels_for(&self, request: &SubscriptionRequest) -> Vec<Channel> {
        match *request {
            SubscriptionRequest::Ticket(id) => vec![Channel::Ticket(id)],
            SubscriptionRequest::Notifications if self.is_admin() => {
                vec![Channel::Notification(Scope::Tenant(self.tenant_id))]
            }
            SubscriptionRequest::Notifications => self
                .queue_ids
                .iter()
                .map(|q| Channel::Notification(Scope::Queue(*q)))
                .collect(),
            SubscriptionRequest::TicketList(status) if self.is_admin() => vec![Channel::Status {
                scope: Scope::Tenant(self.tenant_id),
                status,
            }],
            SubscriptionRequest::TicketList(TicketStatus::Pending) => self
                .queue_ids
                .iter()
                .map(|q| Channel::Status {
                    scope: Scope::Queue(*q),
                    status: TicketStatus::Pending,
                })
                .collect(),
            SubscriptionRequest::TicketList(_) => Vec::new(),
        }
    }
}

/// What a client asks to join or leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum SubscriptionRequest {
    Ticket(TicketId),
    Notifications,
    TicketList(TicketStatus),
}

/// Ownership facts about a ticket needed to authorize a ticket channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketAccess {
    pub ticket_id: TicketId,
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
    pub queue_id: Option<QueueId>,
}

#[derive(Debug, Clone, Default)]
pub struct AccessContext {
    pub ticket: Option<TicketAccess>,
    pub group_conversations: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denied {
    #[error("ticket {0} not found")]
    UnknownTicket(TicketId),
    #[error("resource belongs to another tenant")]
    OtherTenant,
    #[error("ticket is assigned to another user")]
    NotAssigned,
    #[error("tenant-wide channels are for admins only")]
    AdminOnly,
    #[error("viewer is not a member of queue {0}")]
    NotInQueue(QueueId),
    #[error("queue channels only carry pending tickets")]
    QueueStatusNotPending,
}

/// Decides whether `viewer` may subscribe to `channel`.
pub fn authorize(viewer: &Viewer, channel: &Channel, ctx: &AccessContext) -> Result<(), Denied> {
    match channel {
        Channel::Ticket(id) => {
            let ticket = ctx
                .ticket
                .as_ref()
                .filter(|t| t.ticket_id == *id)
                .ok_or(Denied::UnknownTicket(*id))?;
            if ticket.tenant_id != viewer.tenant_id {
                return Err(Denied::OtherTenant);
            }
            if ticket.user_id == Some(viewer.user_id) || viewer.is_admin() {
                return Ok(());
            }
            match ticket.queue_id {
                Some(queue) if ctx.group_conversations && viewer.in_queue(queue) => Ok(()),
                _ => Err(Denied::NotAssigned),
            }
        }
        Channel::Notification(Scope::Tenant(tenant))
        | Channel::Status {
            scope: Scope::Tenant(tenant),
            ..
        } => {
            if *tenant != viewer.tenant_id {
                Err(Denied::OtherTenant)
            } else if !viewer.is_admin() {
                Err(Denied::AdminOnly)
            } else {
                Ok(())
            }
        }
        Channel::Notification(Scope::Queue(queue)) => {
            if viewer.in_queue(*queue) {
                Ok(())
            } else {
                Err(Denied::NotInQueue(*queue))
            }
        }
        Channel::Status {
            scope: Scope::Queue(queue),
            status,
        } => {
            if *status != TicketStatus::Pending {
                Err(Denied::QueueStatusNotPending)
            } else if !viewer.in_queue(*queue) {
                Err(Denied::NotInQueue(*queue))
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(queues: Vec<QueueId>) -> Viewer {
        Viewer {
            user_id: 7,
            tenant_id: 1,
            profile: Profile::User,
            queue_ids: queues,
        }
    }

    fn admin() -> Viewer {
        Viewer {
            user_id: 1,
            tenant_id: 1,
            profile: Profile::Admin,
            queue_ids: vec![],
        }
    }

    fn ticket(user_id: Option<UserId>, queue_id: Option<QueueId>) -> AccessContext {
        AccessContext {
            ticket: Some(TicketAccess {
                ticket_id: 42,
                tenant_id: 1,
                user_id,
                queue_id,
            }),
            group_conversations: false,
        }
    }

    #[test]
    fn channel_names() {
        assert_eq!(Channel::Ticket(42).to_string(), "ticket-channel:42");
        assert_eq!(
            Channel::Notification(Scope::Tenant(3)).to_string(),
            "tenant-3-notification"
        );
        assert_eq!(
            Channel::Notification(Scope::Queue(9)).to_string(),
            "queue-9-notification"
        );
        assert_eq!(
            Channel::Status {
                scope: Scope::Tenant(3),
                status: TicketStatus::Open
            }
            .to_string(),
            "tenant-3-open"
        );
        assert_eq!(
            Channel::Status {
                scope: Scope::Queue(9),
                status: TicketStatus::Pending
            }
            .to_string(),
            "queue-9-pending"
        );
    }

    #[test]
    fn ticket_channel_rules() {
        let chan = Channel::Ticket(42);
        assert!(authorize(&user(vec![]), &chan, &ticket(Some(7), None)).is_ok());
        assert!(authorize(&admin(), &chan, &ticket(Some(99), None)).is_ok());
        assert_eq!(
            authorize(&user(vec![5]), &chan, &ticket(Some(99), Some(5))),
            Err(Denied::NotAssigned)
        );

        let mut groups = ticket(Some(99), Some(5));
        groups.group_conversations = true;
        assert!(authorize(&user(vec![5]), &chan, &groups).is_ok());
        assert_eq!(
            authorize(&user(vec![6]), &chan, &groups),
            Err(Denied::NotAssigned)
        );

        assert_eq!(
            authorize(&user(vec![]), &chan, &AccessContext::default()),
            Err(Denied::UnknownTicket(42))
        );

        let mut foreign = ticket(Some(7), None);
        foreign.ticket.as_mut().unwrap().tenant_id = 2;
        assert_eq!(
            authorize(&user(vec![]), &chan, &foreign),
            Err(Denied::OtherTenant)
        );
    }

    #[test]
    fn notification_expansion_depends_on_profile() {
        assert_eq!(
            admin().channels_for(&SubscriptionRequest::Notifications),
            vec![Channel::Notification(Scope::Tenant(1))]
        );
        assert_eq!(
            user(vec![2, 3]).channels_for(&SubscriptionRequest::Notifications),
            vec![
                Channel::Notification(Scope::Queue(2)),
                Channel::Notification(Scope::Queue(3))
            ]
        );
        let ctx = AccessContext::default();
        assert_eq!(
            authorize(&user(vec![2]), &Channel::Notification(Scope::Tenant(1)), &ctx),
            Err(Denied::AdminOnly)
        );
        assert_eq!(
            authorize(&user(vec![2]), &Channel::Notification(Scope::Queue(4)), &ctx),
            Err(Denied::NotInQueue(4))
        );
    }

    #[test]
    fn non_admins_only_see_pending_per_queue() {
        let viewer = user(vec![2]);
        assert!(
            viewer
                .channels_for(&SubscriptionRequest::TicketList(TicketStatus::Open))
                .is_empty()
        );
        let pending = viewer.channels_for(&SubscriptionRequest::TicketList(TicketStatus::Pending));
        assert_eq!(
            pending,
            vec![Channel::Status {
                scope: Scope::Queue(2),
                status: TicketStatus::Pending
            }]
        );
        let ctx = AccessContext::default();
        assert!(authorize(&viewer, &pending[0], &ctx).is_ok());
        assert_eq!(
            authorize(
                &viewer,
                &Channel::Status {
                    scope: Scope::Queue(2),
                    status: TicketStatus::Open
                },
                &ctx
            ),
            Err(Denied::QueueStatusNotPending)
        );
        assert_eq!(
            admin().channels_for(&SubscriptionRequest::TicketList(TicketStatus::Open)),
            vec![Channel::Status {
                scope: Scope::Tenant(1),
                status: TicketStatus::Open
            }]
        );
    }
}
