// src/notify.rs

//! Notification collaborator.
//!
//! Events are fire-and-forget: a notifier must never block or fail the
//! scheduling operation that produced the event.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::router::ReclaimReason;
use crate::types::{
    AgentId, AgentStatus, AttackId, AttackStatus, CampaignId, CampaignStatus, TaskId, TaskStatus,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    AgentStatusChanged {
        agent: AgentId,
        from: AgentStatus,
        to: AgentStatus,
    },
    TaskReassigned {
        task: TaskId,
        previous_agent: Option<AgentId>,
        reason: ReclaimReason,
        /// `pending` when the task went back on its lane, `failed` when its
        /// attempts ran out.
        status: TaskStatus,
        attempts: u32,
    },
    AttackStatusChanged {
        attack: AttackId,
        campaign: CampaignId,
        status: AttackStatus,
    },
    CampaignStatusChanged {
        campaign: CampaignId,
        status: CampaignStatus,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: FleetEvent);
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: FleetEvent) {
        match &event {
            FleetEvent::AgentStatusChanged { agent, from, to } => {
                info!(agent = %agent, ?from, ?to, "agent status changed");
            }
            FleetEvent::TaskReassigned {
                task,
                previous_agent,
                reason,
                status,
                attempts,
            } => {
                info!(task = %task, ?previous_agent, ?reason, ?status, attempts, "task reassigned");
            }
            FleetEvent::AttackStatusChanged {
                attack,
                campaign,
                status,
            } => {
                info!(attack = %attack, campaign = %campaign, ?status, "attack status changed");
            }
            FleetEvent::CampaignStatusChanged { campaign, status } => {
                info!(campaign = %campaign, ?status, "campaign status changed");
            }
        }
    }
}

/// Fans events out to any number of live subscribers.
///
/// Slow subscribers lose the oldest events once `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<FleetEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, event: FleetEvent) {
        if self.sender.send(event).is_err() {
            debug!("no subscribers for fleet event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let notifier = BroadcastNotifier::new(8);
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();

        let event = FleetEvent::AgentStatusChanged {
            agent: "rig-1".into(),
            from: AgentStatus::Online,
            to: AgentStatus::Offline,
        };
        notifier.notify(event.clone());

        assert_eq!(a.recv().await.unwrap(), event);
        assert_eq!(b.recv().await.unwrap(), event);
    }

    #[test]
    fn broadcast_without_subscribers_is_silent() {
        let notifier = BroadcastNotifier::default();
        notifier.notify(FleetEvent::CampaignStatusChanged {
            campaign: uuid::Uuid::new_v4(),
            status: CampaignStatus::Running,
        });
        assert_eq!(notifier.subscriber_count(), 0);
    }
}
