// src/types.rs

//! Identifiers and status enums shared across the crate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type CampaignId = Uuid;
pub type AttackId = Uuid;
pub type TaskId = Uuid;
/// Agents identify themselves; the id is opaque to the scheduler.
pub type AgentId = String;

/// Routing lane of a campaign's tasks.
///
/// Assigned once when the campaign is created. The three lanes are drained
/// independently; priority is never compared across lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityClass {
    High,
    Normal,
    Low,
}

impl PriorityClass {
    pub const ALL: [PriorityClass; 3] = [PriorityClass::High, PriorityClass::Normal, PriorityClass::Low];

    /// Stable slot index used by lane backends.
    pub fn index(self) -> usize {
        match self {
            PriorityClass::High => 0,
            PriorityClass::Normal => 1,
            PriorityClass::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PriorityClass::High => "high",
            PriorityClass::Normal => "normal",
            PriorityClass::Low => "low",
        }
    }
}

impl Default for PriorityClass {
    fn default() -> Self {
        PriorityClass::Normal
    }
}

impl fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriorityClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(PriorityClass::High),
            "normal" => Ok(PriorityClass::Normal),
            "low" => Ok(PriorityClass::Low),
            other => Err(format!(
                "invalid priority: {other} (expected \"high\", \"normal\" or \"low\")"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackStatus {
    /// Waiting on dependencies.
    Pending,
    /// Dependencies satisfied; tasks are being generated.
    Ready,
    /// Tasks are enqueued.
    Running,
    Completed,
    Failed,
}

impl AttackStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AttackStatus::Completed | AttackStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether an agent currently holds a lease on the task.
    pub fn is_held(self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
    Busy,
    Error,
}

impl AgentStatus {
    /// Statuses the liveness sweep may demote to `Offline`.
    pub fn is_live(self) -> bool {
        matches!(self, AgentStatus::Online | AgentStatus::Busy)
    }
}

/// Outcome an agent reports for a task it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed { reason: String },
}
