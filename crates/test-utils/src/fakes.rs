#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use fleetsched::model::{Agent, Attack, Campaign, Task};
use fleetsched::notify::{FleetEvent, Notifier};
use fleetsched::router::lanes::{LaneBackend, LaneError, LaneFuture};
use fleetsched::store::{FleetStore, MemoryStore, StoreError, StoreFuture};
use fleetsched::types::{
    AttackId, AttackStatus, CampaignId, CampaignStatus, PriorityClass, TaskId,
};

/// Notifier that keeps every event for later assertions.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<FleetEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<FleetEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&FleetEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: FleetEvent) {
        self.events.lock().push(event);
    }
}

/// Lane backend whose first `failures` calls fail with a transient error
/// before delegating to `inner`.
pub struct FlakyLanes<L> {
    inner: L,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl<L: LaneBackend> FlakyLanes<L> {
    pub fn new(inner: L, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }

    /// Total calls received, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` calls fail.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    fn should_fail(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn unavailable<'a, T: Send + 'a>() -> LaneFuture<'a, T> {
    Box::pin(async { Err::<T, _>(LaneError::Unavailable("injected outage".to_string())) })
}

impl<L: LaneBackend> LaneBackend for FlakyLanes<L> {
    fn publish(&self, lane: PriorityClass, batch: Vec<TaskId>) -> LaneFuture<'_, ()> {
        if self.should_fail() {
            return unavailable();
        }
        self.inner.publish(lane, batch)
    }

    fn pull(&self, lane: PriorityClass) -> LaneFuture<'_, Option<TaskId>> {
        if self.should_fail() {
            return unavailable();
        }
        self.inner.pull(lane)
    }

    fn depth(&self, lane: PriorityClass) -> LaneFuture<'_, usize> {
        if self.should_fail() {
            return unavailable();
        }
        self.inner.depth(lane)
    }
}

/// Store wrapper over a [`MemoryStore`] that can fail task loads and hold
/// one attack transition until the test releases it.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    task_load_failures: AtomicUsize,
    gate: Mutex<Option<TransitionGate>>,
}

struct TransitionGate {
    to: AttackStatus,
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

/// Handles for a held transition.
#[derive(Clone)]
pub struct GateHandle {
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl GateHandle {
    /// Wait until the held transition has been attempted.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Let the held transition through.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            task_load_failures: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    /// Make the next `n` single-task loads fail.
    pub fn fail_task_loads(&self, n: usize) {
        self.task_load_failures.store(n, Ordering::SeqCst);
    }

    /// Hold the next attack transition into `to`.
    pub fn hold_attack_transition(&self, to: AttackStatus) -> GateHandle {
        let handle = GateHandle {
            reached: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };
        *self.gate.lock() = Some(TransitionGate {
            to,
            reached: handle.reached.clone(),
            release: handle.release.clone(),
        });
        handle
    }
}

fn store_unavailable<'a, T: Send + 'a>() -> StoreFuture<'a, T> {
    Box::pin(async { Err::<T, _>(StoreError::Unavailable("injected outage".to_string())) })
}

impl FleetStore for FaultyStore {
    fn insert_campaign(&self, campaign: Campaign, attacks: Vec<Attack>) -> StoreFuture<'_, ()> {
        self.inner.insert_campaign(campaign, attacks)
    }

    fn campaign(&self, id: CampaignId) -> StoreFuture<'_, Option<Campaign>> {
        self.inner.campaign(id)
    }

    fn transition_campaign(
        &self,
        id: CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> StoreFuture<'_, bool> {
        self.inner.transition_campaign(id, from, to)
    }

    fn attacks(&self, campaign: CampaignId) -> StoreFuture<'_, Vec<Attack>> {
        self.inner.attacks(campaign)
    }

    fn attacks_in(&self, status: AttackStatus) -> StoreFuture<'_, Vec<Attack>> {
        self.inner.attacks_in(status)
    }

    fn attack(&self, id: AttackId) -> StoreFuture<'_, Option<Attack>> {
        self.inner.attack(id)
    }

    fn transition_attack(
        &self,
        id: AttackId,
        from: AttackStatus,
        to: AttackStatus,
    ) -> StoreFuture<'_, bool> {
        let gate = {
            let mut slot = self.gate.lock();
            match slot.as_ref() {
                Some(gate) if gate.to == to => slot.take(),
                _ => None,
            }
        };
        if let Some(gate) = gate {
            return Box::pin(async move {
                gate.reached.notify_one();
                gate.release.notified().await;
                self.inner.transition_attack(id, from, to).await
            });
        }
        self.inner.transition_attack(id, from, to)
    }

    fn insert_tasks(&self, attack: AttackId, tasks: Vec<Task>) -> StoreFuture<'_, ()> {
        self.inner.insert_tasks(attack, tasks)
    }

    fn task(&self, id: TaskId) -> StoreFuture<'_, Option<Task>> {
        let failing = self
            .task_load_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return store_unavailable();
        }
        self.inner.task(id)
    }

    fn tasks_of_attack(&self, attack: AttackId) -> StoreFuture<'_, Vec<Task>> {
        self.inner.tasks_of_attack(attack)
    }

    fn held_tasks(&self) -> StoreFuture<'_, Vec<Task>> {
        self.inner.held_tasks()
    }

    fn tasks_held_by(&self, agent: &str) -> StoreFuture<'_, Vec<Task>> {
        self.inner.tasks_held_by(agent)
    }

    fn unpublished_tasks(&self) -> StoreFuture<'_, Vec<Task>> {
        self.inner.unpublished_tasks()
    }

    fn mark_published(&self, published: Vec<(TaskId, u64)>) -> StoreFuture<'_, ()> {
        self.inner.mark_published(published)
    }

    fn swap_task(&self, expected_revision: u64, next: Task) -> StoreFuture<'_, bool> {
        self.inner.swap_task(expected_revision, next)
    }

    fn register_agent(&self, agent: Agent) -> StoreFuture<'_, Agent> {
        self.inner.register_agent(agent)
    }

    fn agent(&self, id: &str) -> StoreFuture<'_, Option<Agent>> {
        self.inner.agent(id)
    }

    fn agents(&self) -> StoreFuture<'_, Vec<Agent>> {
        self.inner.agents()
    }

    fn swap_agent(&self, expected_revision: u64, next: Agent) -> StoreFuture<'_, bool> {
        self.inner.swap_agent(expected_revision, next)
    }
}
