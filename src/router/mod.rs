// src/router/mod.rs

//! Task routing: lanes, claims and outcome reports.
//!
//! - [`lanes`] defines the message-delivery collaborator and an in-memory
//!   implementation.
//! - [`retry`] holds the backoff policy wrapped around every collaborator
//!   call.
//!
//! [`TaskRouter`] never holds a lock across calls. Claim, report and reclaim
//! are each a read followed by one conditional write against the store; a
//! lost race is returned as a value, not an error.
//!
//! A write that returns a task to pending also flags it `awaiting_publish`.
//! The flag is cleared once the id is on a lane, so a lane outage between
//! the two steps never strands a task: the sweep republishes it.

pub mod lanes;
pub mod retry;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::errors::{FleetError, Result};
use crate::model::Task;
use crate::store::FleetStore;
use crate::types::{AgentStatus, PriorityClass, TaskId, TaskOutcome, TaskStatus};

pub use lanes::{LaneBackend, LaneError, MemoryLanes};
pub use retry::RetryPolicy;

/// Lease and attempt limits applied by the router.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// How long a claim stays valid without a report or renewal.
    pub lease: Duration,
    /// A task whose attempt counter exceeds this becomes terminally failed.
    pub max_attempts: u32,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            lease: Duration::minutes(10),
            max_attempts: 3,
        }
    }
}

/// Result of a claim.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The task is now assigned to the claiming agent.
    Claimed(Task),
    /// Every lane the agent may draw from is empty.
    NoTaskAvailable,
    /// The agent is registered but not in a state that may take work
    /// (offline or errored); it must heartbeat first.
    Ineligible { status: AgentStatus },
}

/// Why an agent-side operation was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    UnknownTask,
    /// The task is not assigned or running.
    NotHeld,
    /// Another agent (or nobody) holds the lease.
    NotHolder,
    /// The task changed between read and write.
    Raced,
}

/// Result of a report, progress or renewal call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// Applied; carries the task as stored after the write.
    Accepted(Task),
    /// Precondition failed; nothing was written.
    Rejected(StaleReason),
}

/// Why a held task is being taken back from its agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimReason {
    AgentOffline,
    LeaseExpired,
}

pub struct TaskRouter {
    store: Arc<dyn FleetStore>,
    lanes: Arc<dyn LaneBackend>,
    settings: RouterSettings,
    retry: RetryPolicy,
    /// Rotates the first lane a claim looks at, so no lane is starved.
    cursor: AtomicUsize,
}

impl std::fmt::Debug for TaskRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRouter")
            .field("settings", &self.settings)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl TaskRouter {
    pub fn new(
        store: Arc<dyn FleetStore>,
        lanes: Arc<dyn LaneBackend>,
        settings: RouterSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            lanes,
            settings,
            retry,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Place a batch of pending tasks on the lane of their campaign.
    ///
    /// Once the lane accepted the batch the tasks' `awaiting_publish` flags
    /// are cleared. If the lane stays unavailable the error is returned and
    /// the flags stay set, so the next [`TaskRouter::republish_unpublished`]
    /// picks them up.
    pub async fn enqueue(&self, priority: PriorityClass, batch: &[Task]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let ids: Vec<TaskId> = batch.iter().map(|t| t.id).collect();
        let count = ids.len();
        self.retry
            .run("enqueue", || self.lanes.publish(priority, ids.clone()))
            .await?;

        let published: Vec<(TaskId, u64)> = batch
            .iter()
            .filter(|t| t.awaiting_publish)
            .map(|t| (t.id, t.revision))
            .collect();
        if !published.is_empty() {
            // A stale flag only costs a duplicate delivery on the next sweep.
            if let Err(err) = self
                .retry
                .run("enqueue.mark", || self.store.mark_published(published.clone()))
                .await
            {
                debug!(lane = %priority, error = %err, "could not clear publish flags");
            }
        }

        debug!(lane = %priority, count, "enqueued tasks");
        Ok(())
    }

    /// Publish every pending task whose id never reached a lane, grouped by
    /// lane. Returns how many were published.
    pub async fn republish_unpublished(&self) -> Result<usize> {
        let unpublished = self
            .retry
            .run("republish.load", || self.store.unpublished_tasks())
            .await?;
        if unpublished.is_empty() {
            return Ok(0);
        }

        let mut published = 0;
        for lane in PriorityClass::ALL {
            let batch: Vec<Task> = unpublished
                .iter()
                .filter(|t| t.lane == lane)
                .cloned()
                .collect();
            self.enqueue(lane, &batch).await?;
            published += batch.len();
        }

        info!(tasks = published, "republished tasks missing from their lanes");
        Ok(published)
    }

    /// Current depth of each lane, in `PriorityClass::ALL` order.
    pub async fn lane_depths(&self) -> Result<[usize; 3]> {
        let mut depths = [0usize; 3];
        for lane in PriorityClass::ALL {
            depths[lane.index()] = self
                .retry
                .run("lane_depth", || self.lanes.depth(lane))
                .await?;
        }
        Ok(depths)
    }

    pub async fn claim(&self, agent_id: &str) -> Result<ClaimOutcome> {
        self.claim_at(agent_id, Utc::now()).await
    }

    /// Assign one pending task to `agent_id`, with a lease ending at
    /// `now + lease`.
    ///
    /// Lanes are tried starting from a rotating offset. Ids whose task is no
    /// longer pending (duplicate deliveries, already reclaimed) are dropped.
    pub async fn claim_at(&self, agent_id: &str, now: DateTime<Utc>) -> Result<ClaimOutcome> {
        let agent = self
            .retry
            .run("claim.agent", || self.store.agent(agent_id))
            .await?
            .ok_or_else(|| FleetError::AgentNotFound(agent_id.to_string()))?;

        if !agent.status.is_live() {
            debug!(agent = %agent_id, status = ?agent.status, "claim from non-live agent refused");
            return Ok(ClaimOutcome::Ineligible {
                status: agent.status,
            });
        }

        let lanes = agent.eligible_lanes();
        let offset = self.cursor.fetch_add(1, Ordering::Relaxed) % lanes.len();

        for i in 0..lanes.len() {
            let lane = lanes[(offset + i) % lanes.len()];
            if let Some(task) = self.claim_from_lane(lane, agent_id, now).await? {
                self.set_agent_status(agent_id, AgentStatus::Online, AgentStatus::Busy)
                    .await;
                return Ok(ClaimOutcome::Claimed(task));
            }
        }

        Ok(ClaimOutcome::NoTaskAvailable)
    }

    async fn claim_from_lane(
        &self,
        lane: PriorityClass,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        loop {
            let Some(task_id) = self
                .retry
                .run("claim.pull", || self.lanes.pull(lane))
                .await?
            else {
                return Ok(None);
            };

            match self.claim_delivery(lane, task_id, agent_id, now).await {
                Ok(Some(task)) => return Ok(Some(task)),
                Ok(None) => continue,
                Err(err) => {
                    self.return_to_lane(lane, task_id).await;
                    return Err(err);
                }
            }
        }
    }

    /// Try to assign one delivered id. `Ok(None)` means the delivery was
    /// stale or lost to another claimer and can be dropped.
    async fn claim_delivery(
        &self,
        lane: PriorityClass,
        task_id: TaskId,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        let Some(task) = self
            .retry
            .run("claim.load", || self.store.task(task_id))
            .await?
        else {
            warn!(task = %task_id, lane = %lane, "lane delivered unknown task; dropping");
            return Ok(None);
        };

        if task.status != TaskStatus::Pending {
            debug!(task = %task_id, status = ?task.status, "dropping stale delivery");
            return Ok(None);
        }

        let mut next = task.clone();
        next.status = TaskStatus::Assigned;
        next.assignee = Some(agent_id.to_string());
        next.lease_expires_at = Some(now + self.settings.lease);
        next.awaiting_publish = false;

        if self.swap(&task, next.clone(), "claim.swap").await? {
            info!(
                task = %task.id,
                agent = %agent_id,
                lane = %lane,
                range_start = task.range.start,
                range_end = task.range.end,
                "task claimed"
            );
            next.revision = task.revision + 1;
            return Ok(Some(next));
        }

        // Lost the swap. If the write landed before a transient error hid
        // it, the stored task is ours.
        if let Some(stored) = self.store_task(task_id).await? {
            if stored.is_held_by(agent_id) && stored.lease_expires_at == next.lease_expires_at {
                return Ok(Some(stored));
            }
        }
        debug!(task = %task_id, agent = %agent_id, "claim lost race; trying next delivery");
        Ok(None)
    }

    /// Put back an id whose claim failed before reaching a verdict.
    async fn return_to_lane(&self, lane: PriorityClass, task_id: TaskId) {
        match self
            .retry
            .run("claim.return", || self.lanes.publish(lane, vec![task_id]))
            .await
        {
            Ok(()) => debug!(task = %task_id, lane = %lane, "returned delivery to lane"),
            Err(err) => {
                error!(task = %task_id, lane = %lane, error = %err, "could not return delivery to lane")
            }
        }
    }

    /// Apply a completion or failure report from the lease holder.
    pub async fn report(
        &self,
        task_id: TaskId,
        agent_id: &str,
        outcome: TaskOutcome,
    ) -> Result<ReportOutcome> {
        let task = match self.held_by(task_id, agent_id).await? {
            Ok(task) => task,
            Err(reason) => {
                warn!(task = %task_id, agent = %agent_id, ?reason, "stale report rejected");
                return Ok(ReportOutcome::Rejected(reason));
            }
        };

        let next = match &outcome {
            TaskOutcome::Completed => {
                let mut next = task.clone();
                next.status = TaskStatus::Completed;
                next.assignee = None;
                next.lease_expires_at = None;
                next
            }
            TaskOutcome::Failed { reason } => {
                warn!(task = %task_id, agent = %agent_id, %reason, "agent reported task failure");
                self.released(&task)
            }
        };

        if !self.swap(&task, next.clone(), "report.swap").await? {
            return Ok(ReportOutcome::Rejected(StaleReason::Raced));
        }

        let stored = Task {
            revision: task.revision + 1,
            ..next
        };
        info!(
            task = %task_id,
            agent = %agent_id,
            status = ?stored.status,
            attempts = stored.attempts,
            "task report applied"
        );

        self.publish_released(&stored).await;
        if self.holds_nothing(agent_id).await {
            self.set_agent_status(agent_id, AgentStatus::Busy, AgentStatus::Online)
                .await;
        }

        Ok(ReportOutcome::Accepted(stored))
    }

    /// Agent signals it started work: `assigned` becomes `running` and the
    /// lease is renewed.
    pub async fn mark_running(
        &self,
        task_id: TaskId,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ReportOutcome> {
        self.touch(task_id, agent_id, now, true).await
    }

    /// Extend the lease of a held task without changing its status.
    pub async fn renew_lease(
        &self,
        task_id: TaskId,
        agent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ReportOutcome> {
        self.touch(task_id, agent_id, now, false).await
    }

    async fn touch(
        &self,
        task_id: TaskId,
        agent_id: &str,
        now: DateTime<Utc>,
        start: bool,
    ) -> Result<ReportOutcome> {
        let task = match self.held_by(task_id, agent_id).await? {
            Ok(task) => task,
            Err(reason) => return Ok(ReportOutcome::Rejected(reason)),
        };

        let mut next = task.clone();
        if start {
            next.status = TaskStatus::Running;
        }
        next.lease_expires_at = Some(now + self.settings.lease);

        if !self.swap(&task, next.clone(), "touch.swap").await? {
            return Ok(ReportOutcome::Rejected(StaleReason::Raced));
        }

        debug!(task = %task_id, agent = %agent_id, status = ?next.status, "lease renewed");
        Ok(ReportOutcome::Accepted(Task {
            revision: task.revision + 1,
            ..next
        }))
    }

    /// Take a held task back from its agent.
    ///
    /// `snapshot` is the task as the caller read it; the write only lands if
    /// nothing changed since. Returns the task as stored after the write, or
    /// `None` when another writer got there first.
    pub async fn reclaim(&self, snapshot: &Task, reason: ReclaimReason) -> Result<Option<Task>> {
        if !snapshot.status.is_held() {
            return Ok(None);
        }

        let next = self.released(snapshot);
        if !self.swap(snapshot, next.clone(), "reclaim.swap").await? {
            debug!(task = %snapshot.id, "reclaim lost race");
            return Ok(None);
        }

        let stored = Task {
            revision: snapshot.revision + 1,
            ..next
        };
        info!(
            task = %stored.id,
            previous_agent = ?snapshot.assignee,
            ?reason,
            status = ?stored.status,
            attempts = stored.attempts,
            "task reclaimed"
        );

        self.publish_released(&stored).await;

        Ok(Some(stored))
    }

    /// Clear the holder and count one attempt; terminal once attempts exceed
    /// the configured maximum.
    fn released(&self, task: &Task) -> Task {
        let mut next = task.clone();
        next.assignee = None;
        next.lease_expires_at = None;
        next.attempts = task.attempts.saturating_add(1);
        if next.attempts > self.settings.max_attempts {
            warn!(task = %task.id, attempts = next.attempts, "attempts exhausted; task failed");
            next.status = TaskStatus::Failed;
        } else {
            next.status = TaskStatus::Pending;
            next.awaiting_publish = true;
        }
        next
    }

    /// Put a task that just returned to pending back on its lane.
    ///
    /// The store write already landed, so a lane outage is not the caller's
    /// failure: the task keeps `awaiting_publish` and the next sweep
    /// republishes it.
    async fn publish_released(&self, stored: &Task) {
        if stored.status != TaskStatus::Pending {
            return;
        }
        if let Err(err) = self.enqueue(stored.lane, std::slice::from_ref(stored)).await {
            warn!(task = %stored.id, lane = %stored.lane, error = %err, "requeue deferred to next sweep");
        }
    }

    /// True when `agent_id` holds no task. Read errors count as holding,
    /// which leaves the agent `busy` until its next report.
    async fn holds_nothing(&self, agent_id: &str) -> bool {
        match self.store.tasks_held_by(agent_id).await {
            Ok(held) => held.is_empty(),
            Err(err) => {
                debug!(agent = %agent_id, error = %err, "could not list held tasks");
                false
            }
        }
    }

    /// Load a task and check that `agent_id` holds it.
    async fn held_by(
        &self,
        task_id: TaskId,
        agent_id: &str,
    ) -> Result<std::result::Result<Task, StaleReason>> {
        let Some(task) = self.store_task(task_id).await? else {
            return Ok(Err(StaleReason::UnknownTask));
        };
        if !task.status.is_held() {
            return Ok(Err(StaleReason::NotHeld));
        }
        if task.assignee.as_deref() != Some(agent_id) {
            return Ok(Err(StaleReason::NotHolder));
        }
        Ok(Ok(task))
    }

    async fn store_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        self.retry
            .run("task.load", || self.store.task(task_id))
            .await
    }

    async fn swap(&self, current: &Task, next: Task, operation: &'static str) -> Result<bool> {
        self.retry
            .run(operation, || self.store.swap_task(current.revision, next.clone()))
            .await
    }

    /// Best-effort agent status bookkeeping; never fails the caller.
    async fn set_agent_status(&self, agent_id: &str, from: AgentStatus, to: AgentStatus) {
        let agent = match self.store.agent(agent_id).await {
            Ok(Some(agent)) if agent.status == from => agent,
            Ok(_) => return,
            Err(err) => {
                debug!(agent = %agent_id, error = %err, "skipping agent status update");
                return;
            }
        };

        let revision = agent.revision;
        let next = crate::model::Agent { status: to, ..agent };
        if let Err(err) = self.store.swap_agent(revision, next).await {
            debug!(agent = %agent_id, error = %err, "agent status update failed");
        }
    }
}
