// src/model.rs

//! Records shared between the scheduling components and the persistence
//! collaborator.
//!
//! Every mutable record carries a `revision`. Stores only accept a write whose
//! expected revision matches the stored one, which is how claim, report and
//! reclaim stay one-shot conditional writes.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::keyspace::KeyspaceDescriptor;
use crate::types::{
    AgentId, AgentStatus, AttackId, AttackStatus, CampaignId, CampaignStatus, PriorityClass,
    TaskId, TaskStatus,
};

/// Half-open range `[start, end)` in an attack's unit space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyRange {
    pub start: u64,
    pub end: u64,
}

impl KeyRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub priority: PriorityClass,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(name: impl Into<String>, priority: PriorityClass) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            priority,
            status: CampaignStatus::Draft,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attack {
    pub id: AttackId,
    pub campaign_id: CampaignId,
    /// Position within the campaign's ordered attack list.
    pub position: usize,
    pub name: String,
    /// Dependency references as positions in the same attack list.
    pub deps: Vec<usize>,
    pub keyspace: KeyspaceDescriptor,
    pub status: AttackStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub attack_id: AttackId,
    pub campaign_id: CampaignId,
    /// Lane the task is routed on; copied from the campaign at generation time.
    pub lane: PriorityClass,
    pub range: KeyRange,
    pub status: TaskStatus,
    pub assignee: Option<AgentId>,
    pub attempts: u32,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Set by the write that makes the task pending and cleared once its id
    /// is on a lane. Pending tasks still flagged are republished by the
    /// liveness sweep.
    #[serde(default)]
    pub awaiting_publish: bool,
    pub revision: u64,
}

impl Task {
    pub fn pending(attack: &Attack, lane: PriorityClass, range: KeyRange) -> Self {
        Self {
            id: Uuid::new_v4(),
            attack_id: attack.id,
            campaign_id: attack.campaign_id,
            lane,
            range,
            status: TaskStatus::Pending,
            assignee: None,
            attempts: 0,
            lease_expires_at: None,
            awaiting_publish: true,
            revision: 0,
        }
    }

    /// True when `agent` is the current lease holder.
    pub fn is_held_by(&self, agent: &str) -> bool {
        self.status.is_held() && self.assignee.as_deref() == Some(agent)
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status.is_held() && self.lease_expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub status: AgentStatus,
    pub last_seen_at: DateTime<Utc>,
    pub capabilities: BTreeSet<String>,
    pub revision: u64,
}

impl Agent {
    pub fn new(id: impl Into<AgentId>, capabilities: BTreeSet<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            status: AgentStatus::Online,
            last_seen_at: now,
            capabilities,
            revision: 0,
        }
    }

    /// Lanes this agent may claim from.
    ///
    /// Agents tagged with `lane:<class>` capabilities form that lane's
    /// dedicated pool; untagged agents serve every lane.
    pub fn eligible_lanes(&self) -> Vec<PriorityClass> {
        let tagged: Vec<PriorityClass> = PriorityClass::ALL
            .into_iter()
            .filter(|lane| self.capabilities.contains(&format!("lane:{lane}")))
            .collect();

        if tagged.is_empty() {
            PriorityClass::ALL.to_vec()
        } else {
            tagged
        }
    }
}

/// A campaign as submitted for creation, before ids are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignDefinition {
    pub name: String,
    pub priority: PriorityClass,
    pub attacks: Vec<AttackDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackDefinition {
    pub name: String,
    /// Positions of other attacks in the same definition list.
    pub deps: Vec<usize>,
    pub keyspace: KeyspaceDescriptor,
}

impl CampaignDefinition {
    /// Materialise the campaign and its attacks with fresh ids.
    pub fn instantiate(&self) -> (Campaign, Vec<Attack>) {
        let campaign = Campaign::new(self.name.clone(), self.priority);
        let attacks = self
            .attacks
            .iter()
            .enumerate()
            .map(|(position, def)| Attack {
                id: Uuid::new_v4(),
                campaign_id: campaign.id,
                position,
                name: def.name.clone(),
                deps: def.deps.clone(),
                keyspace: def.keyspace.clone(),
                status: AttackStatus::Pending,
            })
            .collect();
        (campaign, attacks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn untagged_agent_serves_every_lane() {
        let agent = Agent::new("a1", caps(&["gpu"]), Utc::now());
        assert_eq!(agent.eligible_lanes(), PriorityClass::ALL.to_vec());
    }

    #[test]
    fn lane_tags_restrict_eligibility() {
        let agent = Agent::new("a1", caps(&["lane:low", "lane:high"]), Utc::now());
        assert_eq!(
            agent.eligible_lanes(),
            vec![PriorityClass::High, PriorityClass::Low]
        );
    }
}
