// src/engine/coordinator.rs

//! Campaign and attack orchestration.
//!
//! The coordinator owns no state of its own. It reacts to three things:
//! - a campaign start: validate the attack graph once, then generate roots;
//! - a task becoming terminal: re-aggregate its attack, and when the attack
//!   completes generate every dependent whose dependencies are all complete;
//! - pause/resume, which only gates generation.

use std::future::Future;
use std::num::NonZeroU64;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::{validate_attacks, DependencyGraph, GraphValidation};
use crate::errors::{FleetError, Result};
use crate::keyspace::{partition, KeyspaceError, KeyspaceEstimator, Partition};
use crate::model::{Attack, Campaign, CampaignDefinition, Task};
use crate::notify::{FleetEvent, Notifier};
use crate::router::{ReportOutcome, RetryPolicy, TaskRouter};
use crate::store::{FleetStore, StoreError};
use crate::types::{
    AttackId, AttackStatus, CampaignId, CampaignStatus, TaskId, TaskOutcome, TaskStatus,
};

type GenerateFuture<'a> = Pin<Box<dyn Future<Output = Result<usize>> + Send + 'a>>;

/// Per-attack task counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackProgress {
    pub attack_id: AttackId,
    pub name: String,
    pub status: AttackStatus,
    pub tasks_total: usize,
    pub tasks_pending: usize,
    /// Assigned or running.
    pub tasks_held: usize,
    pub tasks_completed: usize,
    pub tasks_failed: usize,
}

/// Point-in-time view of a campaign for dashboards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignProgress {
    pub campaign_id: CampaignId,
    pub name: String,
    pub status: CampaignStatus,
    pub attacks: Vec<AttackProgress>,
}

impl CampaignProgress {
    pub fn tasks_total(&self) -> usize {
        self.attacks.iter().map(|a| a.tasks_total).sum()
    }

    pub fn tasks_completed(&self) -> usize {
        self.attacks.iter().map(|a| a.tasks_completed).sum()
    }

    pub fn attacks_in(&self, status: AttackStatus) -> usize {
        self.attacks.iter().filter(|a| a.status == status).count()
    }
}

pub struct SchedulingCoordinator {
    store: Arc<dyn FleetStore>,
    router: Arc<TaskRouter>,
    estimator: Arc<dyn KeyspaceEstimator>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    task_size: NonZeroU64,
    max_tasks_per_attack: u64,
}

impl std::fmt::Debug for SchedulingCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulingCoordinator")
            .field("task_size", &self.task_size)
            .field("max_tasks_per_attack", &self.max_tasks_per_attack)
            .finish_non_exhaustive()
    }
}

impl SchedulingCoordinator {
    pub fn new(
        store: Arc<dyn FleetStore>,
        router: Arc<TaskRouter>,
        estimator: Arc<dyn KeyspaceEstimator>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
        task_size: NonZeroU64,
        max_tasks_per_attack: u64,
    ) -> Self {
        Self {
            store,
            router,
            estimator,
            notifier,
            retry,
            task_size,
            max_tasks_per_attack,
        }
    }

    pub fn router(&self) -> &Arc<TaskRouter> {
        &self.router
    }

    /// Persist a new campaign in `draft` with all attacks `pending`.
    pub async fn create_campaign(&self, definition: &CampaignDefinition) -> Result<Campaign> {
        let (campaign, attacks) = definition.instantiate();
        let count = attacks.len();

        self.retry
            .run("create_campaign", || {
                self.store.insert_campaign(campaign.clone(), attacks.clone())
            })
            .await?;

        info!(
            campaign = %campaign.id,
            name = %campaign.name,
            priority = %campaign.priority,
            attacks = count,
            "campaign created"
        );
        Ok(campaign)
    }

    /// Validate the attack graph and, when it is acyclic, move the campaign
    /// to `running` and generate every attack without dependencies.
    ///
    /// An invalid graph moves the campaign to `failed` and returns
    /// [`FleetError::DependencyCycle`]; no task is ever generated for it.
    pub async fn start_campaign(&self, campaign_id: CampaignId) -> Result<Campaign> {
        let campaign = self.load_campaign(campaign_id).await?;
        if campaign.status != CampaignStatus::Draft {
            return Err(FleetError::InvalidTransition(format!(
                "campaign {} cannot start from {:?}",
                campaign.name, campaign.status
            )));
        }

        let attacks = self.load_attacks(campaign_id).await?;

        if let GraphValidation::Invalid { cycle } = validate_attacks(&attacks) {
            warn!(campaign = %campaign.id, ?cycle, "attack graph has a cycle; failing campaign");
            self.transition_campaign(&campaign, CampaignStatus::Draft, CampaignStatus::Failed)
                .await?;
            return Err(FleetError::DependencyCycle {
                campaign: campaign.name,
                cycle,
            });
        }

        if !self
            .transition_campaign(&campaign, CampaignStatus::Draft, CampaignStatus::Running)
            .await?
        {
            return Err(FleetError::InvalidTransition(format!(
                "campaign {} was started concurrently",
                campaign.name
            )));
        }
        info!(campaign = %campaign.id, name = %campaign.name, "campaign started");

        let graph = DependencyGraph::from_attacks(&attacks);
        for position in graph.roots() {
            self.generate_attack(attacks[position].id).await?;
        }

        self.settle_campaign(campaign_id).await?;
        self.load_campaign(campaign_id).await
    }

    /// Partition an attack and enqueue its tasks.
    ///
    /// Safe to call again after a failure part-way: if the attack already has
    /// committed tasks, its pending tasks are re-published instead. Does
    /// nothing while the owning campaign is not running. Returns the number
    /// of tasks published.
    pub async fn generate_attack(&self, attack_id: AttackId) -> Result<usize> {
        let attack = self.load_attack(attack_id).await?;
        let campaign = self.load_campaign(attack.campaign_id).await?;

        if campaign.status != CampaignStatus::Running {
            debug!(attack = %attack.id, campaign_status = ?campaign.status, "campaign not running; generation deferred");
            return Ok(0);
        }

        match attack.status {
            AttackStatus::Pending => {
                if self
                    .transition_attack(&attack, AttackStatus::Pending, AttackStatus::Ready)
                    .await?
                {
                    info!(attack = %attack.id, name = %attack.name, "attack ready");
                } else if self.load_attack(attack_id).await?.status.is_terminal() {
                    return Ok(0);
                }
            }
            AttackStatus::Ready | AttackStatus::Running => {}
            AttackStatus::Completed | AttackStatus::Failed => return Ok(0),
        }

        let existing = self.tasks_of(attack.id).await?;
        if !existing.is_empty() {
            return self.republish(&campaign, &attack, existing).await;
        }

        let total = match self.sized_keyspace(&attack) {
            Ok(total) => total,
            Err(err) => {
                warn!(attack = %attack.id, error = %err, "keyspace cannot be scheduled");
                self.fail_attack(&attack, AttackStatus::Ready).await?;
                self.settle_campaign(campaign.id).await?;
                return Err(err.into());
            }
        };

        let ranges = partition(total, self.task_size);
        if ranges.is_empty() {
            info!(attack = %attack.id, "empty keyspace; attack completes without tasks");
            if self
                .transition_attack(&attack, AttackStatus::Ready, AttackStatus::Completed)
                .await?
            {
                self.on_attack_completed(&attack).await?;
            }
            self.settle_campaign(campaign.id).await?;
            return Ok(0);
        }

        let tasks: Vec<Task> = ranges
            .into_iter()
            .map(|range| Task::pending(&attack, campaign.priority, range))
            .collect();

        let inserted = self
            .retry
            .run("generate.insert", || {
                self.store.insert_tasks(attack.id, tasks.clone())
            })
            .await;

        match inserted {
            Ok(()) => {}
            // Another instance committed first; publish what it stored.
            Err(FleetError::Store(StoreError::Conflict(_))) => {
                let existing = self.tasks_of(attack.id).await?;
                return self.republish(&campaign, &attack, existing).await;
            }
            Err(err) => return Err(err),
        }

        // Running before any id is claimable, so the report of the last
        // task always finds the attack settleable.
        self.transition_attack(&attack, AttackStatus::Ready, AttackStatus::Running)
            .await?;
        self.router.enqueue(campaign.priority, &tasks).await?;

        info!(
            attack = %attack.id,
            lane = %campaign.priority,
            keyspace = total,
            tasks = tasks.len(),
            "attack tasks generated"
        );
        Ok(tasks.len())
    }

    /// Total keyspace of an attack, refused when it would split into more
    /// than `max_tasks_per_attack` tasks.
    fn sized_keyspace(&self, attack: &Attack) -> std::result::Result<u64, KeyspaceError> {
        let total = self.estimator.total(&attack.keyspace)?;
        let tasks = Partition::new(total, self.task_size).remaining();
        if tasks > self.max_tasks_per_attack {
            return Err(KeyspaceError::TooManyTasks {
                tasks,
                max: self.max_tasks_per_attack,
            });
        }
        Ok(total)
    }

    /// Boxed entry point for generation triggered from within generation
    /// (a completed attack unlocking its dependents).
    fn generate_boxed(&self, attack_id: AttackId) -> GenerateFuture<'_> {
        Box::pin(self.generate_attack(attack_id))
    }

    async fn republish(
        &self,
        campaign: &Campaign,
        attack: &Attack,
        existing: Vec<Task>,
    ) -> Result<usize> {
        let pending: Vec<Task> = existing
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .collect();

        if attack.status != AttackStatus::Running {
            self.transition_attack(attack, AttackStatus::Ready, AttackStatus::Running)
                .await?;
        }
        self.router.enqueue(campaign.priority, &pending).await?;
        // Every task may already be terminal when an earlier attempt stopped
        // between its last report and the transition above.
        self.settle_attack(attack.id).await?;

        debug!(attack = %attack.id, tasks = pending.len(), "republished pending tasks");
        Ok(pending.len())
    }

    /// Forward an agent's report and settle the attack if the task became
    /// terminal.
    pub async fn report(
        &self,
        task_id: TaskId,
        agent_id: &str,
        outcome: TaskOutcome,
    ) -> Result<ReportOutcome> {
        let result = self.router.report(task_id, agent_id, outcome).await?;
        if let ReportOutcome::Accepted(task) = &result {
            if task.status.is_terminal() {
                self.settle_attack(task.attack_id).await?;
            }
        }
        Ok(result)
    }

    /// Re-aggregate a running attack from its tasks.
    ///
    /// Once every task is terminal the attack becomes `completed`, or
    /// `failed` if any task failed terminally. Returns the attack's status
    /// after settling.
    pub async fn settle_attack(&self, attack_id: AttackId) -> Result<AttackStatus> {
        let attack = self.load_attack(attack_id).await?;
        if attack.status != AttackStatus::Running {
            return Ok(attack.status);
        }

        let tasks = self.tasks_of(attack_id).await?;
        if tasks.iter().any(|t| !t.status.is_terminal()) {
            return Ok(attack.status);
        }

        let failed = tasks.iter().filter(|t| t.status == TaskStatus::Failed).count();
        if failed > 0 {
            warn!(attack = %attack.id, failed, total = tasks.len(), "attack finished with failed tasks");
            self.fail_attack(&attack, AttackStatus::Running).await?;
        } else if self
            .transition_attack(&attack, AttackStatus::Running, AttackStatus::Completed)
            .await?
        {
            info!(attack = %attack.id, name = %attack.name, "attack completed");
            self.on_attack_completed(&attack).await?;
        }

        self.settle_campaign(attack.campaign_id).await?;
        Ok(self.load_attack(attack_id).await?.status)
    }

    /// Re-aggregate every running attack.
    ///
    /// Picks up attacks whose last task became terminal without a settle
    /// reaching them (a failed settle after a sweep, a crash between report
    /// and settle). Returns the attacks that left `running`.
    pub async fn settle_running(&self) -> Result<Vec<AttackId>> {
        let running = self
            .retry
            .run("attacks.running", || self.store.attacks_in(AttackStatus::Running))
            .await?;

        let mut settled = Vec::new();
        for attack in running {
            match self.settle_attack(attack.id).await {
                Ok(AttackStatus::Running) => {}
                Ok(status) => {
                    debug!(attack = %attack.id, ?status, "stalled attack settled");
                    settled.push(attack.id);
                }
                Err(err) => warn!(attack = %attack.id, error = %err, "failed to settle attack"),
            }
        }
        Ok(settled)
    }

    /// Generate every dependent of `completed` whose dependencies are now
    /// all complete.
    async fn on_attack_completed(&self, completed: &Attack) -> Result<()> {
        let attacks = self.load_attacks(completed.campaign_id).await?;
        let graph = DependencyGraph::from_attacks(&attacks);

        for &dependent in graph.dependents_of(completed.position) {
            if attacks[dependent].status != AttackStatus::Pending {
                continue;
            }
            let satisfied = graph
                .dependencies_of(dependent)
                .iter()
                .all(|&dep| attacks[dep].status == AttackStatus::Completed);
            if satisfied {
                debug!(attack = %attacks[dependent].id, after = %completed.id, "dependencies satisfied");
                self.generate_boxed(attacks[dependent].id).await?;
            }
        }
        Ok(())
    }

    /// Mark an attack failed along with everything downstream of it; those
    /// can never have their dependencies satisfied.
    async fn fail_attack(&self, attack: &Attack, from: AttackStatus) -> Result<()> {
        if !self
            .transition_attack(attack, from, AttackStatus::Failed)
            .await?
        {
            return Ok(());
        }

        let attacks = self.load_attacks(attack.campaign_id).await?;
        let graph = DependencyGraph::from_attacks(&attacks);
        for position in graph.downstream_of(attack.position) {
            let downstream = &attacks[position];
            if downstream.status == AttackStatus::Pending
                && self
                    .transition_attack(downstream, AttackStatus::Pending, AttackStatus::Failed)
                    .await?
            {
                warn!(attack = %downstream.id, upstream = %attack.id, "dependency failed; attack will not run");
            }
        }
        Ok(())
    }

    /// Complete a running or paused campaign once every attack is terminal.
    async fn settle_campaign(&self, campaign_id: CampaignId) -> Result<()> {
        let campaign = self.load_campaign(campaign_id).await?;
        if !matches!(
            campaign.status,
            CampaignStatus::Running | CampaignStatus::Paused
        ) {
            return Ok(());
        }

        let attacks = self.load_attacks(campaign_id).await?;
        if attacks.iter().all(|a| a.status.is_terminal())
            && self
                .transition_campaign(&campaign, campaign.status, CampaignStatus::Completed)
                .await?
        {
            let failed = attacks
                .iter()
                .filter(|a| a.status == AttackStatus::Failed)
                .count();
            info!(campaign = %campaign.id, attacks = attacks.len(), failed, "campaign completed");
        }
        Ok(())
    }

    /// Stop generating newly satisfied attacks. Enqueued tasks stay
    /// claimable.
    pub async fn pause_campaign(&self, campaign_id: CampaignId) -> Result<()> {
        let campaign = self.load_campaign(campaign_id).await?;
        if !self
            .transition_campaign(&campaign, CampaignStatus::Running, CampaignStatus::Paused)
            .await?
        {
            return Err(FleetError::InvalidTransition(format!(
                "campaign {} is not running",
                campaign.name
            )));
        }
        info!(campaign = %campaign.id, "campaign paused");
        Ok(())
    }

    /// Resume a paused campaign and generate every attack whose dependencies
    /// completed while it was paused.
    pub async fn resume_campaign(&self, campaign_id: CampaignId) -> Result<usize> {
        let campaign = self.load_campaign(campaign_id).await?;
        if !self
            .transition_campaign(&campaign, CampaignStatus::Paused, CampaignStatus::Running)
            .await?
        {
            return Err(FleetError::InvalidTransition(format!(
                "campaign {} is not paused",
                campaign.name
            )));
        }
        info!(campaign = %campaign.id, "campaign resumed");

        let attacks = self.load_attacks(campaign_id).await?;
        let graph = DependencyGraph::from_attacks(&attacks);
        let mut published = 0;
        for attack in &attacks {
            let satisfied = graph
                .dependencies_of(attack.position)
                .iter()
                .all(|&dep| attacks[dep].status == AttackStatus::Completed);
            let interrupted = attack.status == AttackStatus::Ready;
            if interrupted || (attack.status == AttackStatus::Pending && satisfied) {
                published += self.generate_attack(attack.id).await?;
            }
        }

        self.settle_campaign(campaign_id).await?;
        Ok(published)
    }

    pub async fn progress(&self, campaign_id: CampaignId) -> Result<CampaignProgress> {
        let campaign = self.load_campaign(campaign_id).await?;
        let attacks = self.load_attacks(campaign_id).await?;

        let mut progress = Vec::with_capacity(attacks.len());
        for attack in attacks {
            let tasks = self.tasks_of(attack.id).await?;
            let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
            progress.push(AttackProgress {
                attack_id: attack.id,
                name: attack.name,
                status: attack.status,
                tasks_total: tasks.len(),
                tasks_pending: count(TaskStatus::Pending),
                tasks_held: tasks.iter().filter(|t| t.status.is_held()).count(),
                tasks_completed: count(TaskStatus::Completed),
                tasks_failed: count(TaskStatus::Failed),
            });
        }

        Ok(CampaignProgress {
            campaign_id,
            name: campaign.name,
            status: campaign.status,
            attacks: progress,
        })
    }

    async fn load_campaign(&self, id: CampaignId) -> Result<Campaign> {
        self.retry
            .run("campaign.load", || self.store.campaign(id))
            .await?
            .ok_or(FleetError::CampaignNotFound(id))
    }

    async fn load_attacks(&self, campaign: CampaignId) -> Result<Vec<Attack>> {
        self.retry
            .run("attacks.load", || self.store.attacks(campaign))
            .await
    }

    async fn load_attack(&self, id: AttackId) -> Result<Attack> {
        self.retry
            .run("attack.load", || self.store.attack(id))
            .await?
            .ok_or(FleetError::AttackNotFound(id))
    }

    async fn tasks_of(&self, attack: AttackId) -> Result<Vec<Task>> {
        self.retry
            .run("tasks.load", || self.store.tasks_of_attack(attack))
            .await
    }

    async fn transition_campaign(
        &self,
        campaign: &Campaign,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<bool> {
        let moved = self
            .retry
            .run("campaign.transition", || {
                self.store.transition_campaign(campaign.id, from, to)
            })
            .await?;
        if moved {
            self.notifier.notify(FleetEvent::CampaignStatusChanged {
                campaign: campaign.id,
                status: to,
            });
        }
        Ok(moved)
    }

    async fn transition_attack(
        &self,
        attack: &Attack,
        from: AttackStatus,
        to: AttackStatus,
    ) -> Result<bool> {
        let moved = self
            .retry
            .run("attack.transition", || {
                self.store.transition_attack(attack.id, from, to)
            })
            .await?;
        if moved {
            self.notifier.notify(FleetEvent::AttackStatusChanged {
                attack: attack.id,
                campaign: attack.campaign_id,
                status: to,
            });
        }
        Ok(moved)
    }
}
