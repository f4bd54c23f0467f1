// src/liveness/monitor.rs

//! Periodic liveness sweep.
//!
//! One sweep:
//! 1. demotes live agents not seen for longer than the offline threshold,
//! 2. reclaims every held task whose assignee is not live or whose lease
//!    has expired,
//! 3. republishes pending tasks whose id never reached a lane,
//! 4. notifies each transition and returns the counts.
//!
//! Every write is conditional on the record read in the same sweep, so two
//! sweeps racing each other (or one sweep repeated) apply each transition
//! once. A sweep that fails part-way can simply be run again.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::model::{Agent, Task};
use crate::notify::{FleetEvent, Notifier};
use crate::router::{ReclaimReason, RetryPolicy, TaskRouter};
use crate::store::FleetStore;
use crate::types::{AgentStatus, AttackId, TaskStatus};

#[derive(Debug, Clone)]
pub struct LivenessSettings {
    /// Period between sweeps.
    pub sweep_interval: Duration,
    /// Agents silent for longer than this are marked offline.
    pub offline_threshold: chrono::Duration,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            offline_threshold: chrono::Duration::minutes(5),
        }
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub agents_marked_offline: usize,
    /// Tasks returned to pending.
    pub tasks_reassigned: usize,
    /// Tasks whose reclaim exhausted their attempts.
    pub tasks_failed: usize,
    /// Pending tasks put back on a lane after an earlier publish failed.
    pub tasks_republished: usize,
    /// Attacks with a task that became terminal in this sweep; the
    /// coordinator re-aggregates their status.
    pub attacks_to_settle: BTreeSet<AttackId>,
    /// Per-record writes that failed and were left for the next sweep.
    pub errors: usize,
}

impl SweepReport {
    pub fn is_noop(&self) -> bool {
        self.agents_marked_offline == 0
            && self.tasks_reassigned == 0
            && self.tasks_failed == 0
            && self.tasks_republished == 0
            && self.errors == 0
    }
}

pub struct LivenessMonitor {
    store: Arc<dyn FleetStore>,
    router: Arc<TaskRouter>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    settings: LivenessSettings,
}

impl LivenessMonitor {
    pub fn new(
        store: Arc<dyn FleetStore>,
        router: Arc<TaskRouter>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
        settings: LivenessSettings,
    ) -> Self {
        Self {
            store,
            router,
            notifier,
            retry,
            settings,
        }
    }

    pub fn settings(&self) -> &LivenessSettings {
        &self.settings
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let agents = self
            .retry
            .run("sweep.agents", || self.store.agents())
            .await?;

        let mut live: HashSet<String> = HashSet::new();
        for agent in agents {
            if !agent.status.is_live() {
                continue;
            }
            if now - agent.last_seen_at <= self.settings.offline_threshold {
                live.insert(agent.id);
                continue;
            }

            match self.mark_offline(&agent).await {
                Ok(true) => report.agents_marked_offline += 1,
                // Someone else changed the agent first (a heartbeat, or a
                // concurrent sweep); its current state is decided by them.
                Ok(false) => {
                    if self.is_live_now(&agent.id).await {
                        live.insert(agent.id);
                    }
                }
                Err(err) => {
                    warn!(agent = %agent.id, error = %err, "failed to mark agent offline");
                    report.errors += 1;
                    live.insert(agent.id);
                }
            }
        }

        let held = self
            .retry
            .run("sweep.held_tasks", || self.store.held_tasks())
            .await?;

        for task in held {
            let reason = match task.assignee.as_deref() {
                Some(agent) if !live.contains(agent) => ReclaimReason::AgentOffline,
                None => ReclaimReason::AgentOffline,
                _ if task.lease_expired(now) => ReclaimReason::LeaseExpired,
                _ => continue,
            };

            match self.router.reclaim(&task, reason).await {
                Ok(Some(stored)) => self.record_reclaim(&task, stored, reason, &mut report),
                Ok(None) => debug!(task = %task.id, "task changed during sweep; skipped"),
                Err(err) => {
                    warn!(task = %task.id, error = %err, "failed to reclaim task");
                    report.errors += 1;
                }
            }
        }

        match self.router.republish_unpublished().await {
            Ok(count) => report.tasks_republished = count,
            Err(err) => {
                warn!(error = %err, "failed to republish pending tasks");
                report.errors += 1;
            }
        }

        if report.is_noop() {
            debug!("liveness sweep found nothing to do");
        } else {
            info!(
                agents_marked_offline = report.agents_marked_offline,
                tasks_reassigned = report.tasks_reassigned,
                tasks_failed = report.tasks_failed,
                tasks_republished = report.tasks_republished,
                errors = report.errors,
                "liveness sweep complete"
            );
        }

        Ok(report)
    }

    async fn mark_offline(&self, agent: &Agent) -> Result<bool> {
        let mut next = agent.clone();
        next.status = AgentStatus::Offline;

        let written = self
            .retry
            .run("sweep.mark_offline", || {
                self.store.swap_agent(agent.revision, next.clone())
            })
            .await?;

        if written {
            info!(
                agent = %agent.id,
                last_seen_at = %agent.last_seen_at,
                "agent marked offline"
            );
            self.notifier.notify(FleetEvent::AgentStatusChanged {
                agent: agent.id.clone(),
                from: agent.status,
                to: AgentStatus::Offline,
            });
        }
        Ok(written)
    }

    async fn is_live_now(&self, id: &str) -> bool {
        matches!(self.store.agent(id).await, Ok(Some(agent)) if agent.status.is_live())
    }

    fn record_reclaim(
        &self,
        previous: &Task,
        stored: Task,
        reason: ReclaimReason,
        report: &mut SweepReport,
    ) {
        if stored.status == TaskStatus::Failed {
            report.tasks_failed += 1;
            report.attacks_to_settle.insert(stored.attack_id);
        } else {
            report.tasks_reassigned += 1;
        }

        self.notifier.notify(FleetEvent::TaskReassigned {
            task: stored.id,
            previous_agent: previous.assignee.clone(),
            reason,
            status: stored.status,
            attempts: stored.attempts,
        });
    }
}
