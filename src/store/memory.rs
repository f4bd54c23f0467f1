// src/store/memory.rs

//! In-memory store for single-process deployments and tests.
//!
//! All state lives behind one mutex, so batch inserts are trivially atomic
//! and every swap is linearizable. All state is lost on restart.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{FleetStore, StoreError, StoreFuture};
use crate::model::{Agent, Attack, Campaign, Task};
use crate::types::{
    AgentId, AttackId, AttackStatus, CampaignId, CampaignStatus, TaskId, TaskStatus,
};

#[derive(Debug, Default)]
struct Inner {
    campaigns: HashMap<CampaignId, Campaign>,
    /// Attack ids per campaign, ordered by position.
    campaign_attacks: HashMap<CampaignId, Vec<AttackId>>,
    attacks: HashMap<AttackId, Attack>,
    /// Task ids per attack, ordered by range start.
    attack_tasks: HashMap<AttackId, Vec<TaskId>>,
    tasks: HashMap<TaskId, Task>,
    agents: HashMap<AgentId, Agent>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks across all attacks.
    pub fn task_count(&self) -> usize {
        self.inner.lock().tasks.len()
    }
}

/// Wrap an eagerly computed result in a store future.
fn ready<'a, T: Send + 'a>(result: Result<T, StoreError>) -> StoreFuture<'a, T> {
    Box::pin(async move { result })
}

impl FleetStore for MemoryStore {
    fn insert_campaign(&self, campaign: Campaign, mut attacks: Vec<Attack>) -> StoreFuture<'_, ()> {
        let mut inner = self.inner.lock();

        let result = if inner.campaigns.contains_key(&campaign.id) {
            Err(StoreError::Conflict(format!("campaign {} already exists", campaign.id)))
        } else {
            attacks.sort_by_key(|a| a.position);
            let ids = attacks.iter().map(|a| a.id).collect();
            inner.campaign_attacks.insert(campaign.id, ids);
            for attack in attacks {
                inner.attacks.insert(attack.id, attack);
            }
            inner.campaigns.insert(campaign.id, campaign);
            Ok(())
        };

        ready(result)
    }

    fn campaign(&self, id: CampaignId) -> StoreFuture<'_, Option<Campaign>> {
        ready(Ok(self.inner.lock().campaigns.get(&id).cloned()))
    }

    fn transition_campaign(
        &self,
        id: CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> StoreFuture<'_, bool> {
        let mut inner = self.inner.lock();
        let result = match inner.campaigns.get_mut(&id) {
            Some(c) if c.status == from => {
                c.status = to;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("campaign {id}"))),
        };
        ready(result)
    }

    fn attacks(&self, campaign: CampaignId) -> StoreFuture<'_, Vec<Attack>> {
        let inner = self.inner.lock();
        let attacks = inner
            .campaign_attacks
            .get(&campaign)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.attacks.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        ready(Ok(attacks))
    }

    fn attacks_in(&self, status: AttackStatus) -> StoreFuture<'_, Vec<Attack>> {
        let mut attacks: Vec<Attack> = self
            .inner
            .lock()
            .attacks
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect();
        attacks.sort_by_key(|a| (a.campaign_id, a.position));
        ready(Ok(attacks))
    }

    fn attack(&self, id: AttackId) -> StoreFuture<'_, Option<Attack>> {
        ready(Ok(self.inner.lock().attacks.get(&id).cloned()))
    }

    fn transition_attack(
        &self,
        id: AttackId,
        from: AttackStatus,
        to: AttackStatus,
    ) -> StoreFuture<'_, bool> {
        let mut inner = self.inner.lock();
        let result = match inner.attacks.get_mut(&id) {
            Some(a) if a.status == from => {
                a.status = to;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("attack {id}"))),
        };
        ready(result)
    }

    fn insert_tasks(&self, attack: AttackId, mut tasks: Vec<Task>) -> StoreFuture<'_, ()> {
        let mut inner = self.inner.lock();

        let result = if !inner.attacks.contains_key(&attack) {
            Err(StoreError::NotFound(format!("attack {attack}")))
        } else if inner.attack_tasks.contains_key(&attack) {
            Err(StoreError::Conflict(format!("attack {attack} already has tasks")))
        } else if tasks.iter().any(|t| t.attack_id != attack) {
            Err(StoreError::Conflict(format!(
                "task batch for attack {attack} contains foreign tasks"
            )))
        } else {
            tasks.sort_by_key(|t| t.range.start);
            let ids = tasks.iter().map(|t| t.id).collect();
            inner.attack_tasks.insert(attack, ids);
            for task in tasks {
                inner.tasks.insert(task.id, task);
            }
            Ok(())
        };

        ready(result)
    }

    fn task(&self, id: TaskId) -> StoreFuture<'_, Option<Task>> {
        ready(Ok(self.inner.lock().tasks.get(&id).cloned()))
    }

    fn tasks_of_attack(&self, attack: AttackId) -> StoreFuture<'_, Vec<Task>> {
        let inner = self.inner.lock();
        let tasks = inner
            .attack_tasks
            .get(&attack)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.tasks.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        ready(Ok(tasks))
    }

    fn held_tasks(&self) -> StoreFuture<'_, Vec<Task>> {
        let inner = self.inner.lock();
        let tasks = inner
            .tasks
            .values()
            .filter(|t| t.status.is_held())
            .cloned()
            .collect();
        ready(Ok(tasks))
    }

    fn tasks_held_by(&self, agent: &str) -> StoreFuture<'_, Vec<Task>> {
        let inner = self.inner.lock();
        let tasks = inner
            .tasks
            .values()
            .filter(|t| t.is_held_by(agent))
            .cloned()
            .collect();
        ready(Ok(tasks))
    }

    fn unpublished_tasks(&self) -> StoreFuture<'_, Vec<Task>> {
        let inner = self.inner.lock();
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && t.awaiting_publish)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.attack_id, t.range.start));
        ready(Ok(tasks))
    }

    fn mark_published(&self, published: Vec<(TaskId, u64)>) -> StoreFuture<'_, ()> {
        let mut inner = self.inner.lock();
        for (id, revision) in published {
            if let Some(task) = inner.tasks.get_mut(&id) {
                if task.revision == revision {
                    task.awaiting_publish = false;
                }
            }
        }
        ready(Ok(()))
    }

    fn swap_task(&self, expected_revision: u64, mut next: Task) -> StoreFuture<'_, bool> {
        let mut inner = self.inner.lock();
        let result = match inner.tasks.get_mut(&next.id) {
            Some(stored) if stored.revision == expected_revision => {
                next.revision = expected_revision + 1;
                *stored = next;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("task {}", next.id))),
        };
        ready(result)
    }

    fn register_agent(&self, agent: Agent) -> StoreFuture<'_, Agent> {
        let mut inner = self.inner.lock();
        let stored = inner
            .agents
            .entry(agent.id.clone())
            .or_insert(agent)
            .clone();
        ready(Ok(stored))
    }

    fn agent(&self, id: &str) -> StoreFuture<'_, Option<Agent>> {
        ready(Ok(self.inner.lock().agents.get(id).cloned()))
    }

    fn agents(&self) -> StoreFuture<'_, Vec<Agent>> {
        let mut agents: Vec<Agent> = self.inner.lock().agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        ready(Ok(agents))
    }

    fn swap_agent(&self, expected_revision: u64, mut next: Agent) -> StoreFuture<'_, bool> {
        let mut inner = self.inner.lock();
        let result = match inner.agents.get_mut(&next.id) {
            Some(stored) if stored.revision == expected_revision => {
                next.revision = expected_revision + 1;
                *stored = next;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("agent {}", next.id))),
        };
        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::KeyspaceDescriptor;
    use crate::model::KeyRange;
    use crate::types::PriorityClass;
    use uuid::Uuid;

    fn seeded() -> (MemoryStore, Attack) {
        let store = MemoryStore::new();
        let campaign = Campaign::new("c", PriorityClass::Normal);
        let attack = Attack {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            position: 0,
            name: "a".to_string(),
            deps: vec![],
            keyspace: KeyspaceDescriptor::Explicit { total: 10 },
            status: AttackStatus::Pending,
        };
        block_on(store.insert_campaign(campaign, vec![attack.clone()])).unwrap();
        (store, attack)
    }

    fn block_on<T>(fut: StoreFuture<'_, T>) -> Result<T, StoreError> {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[test]
    fn second_task_batch_for_attack_conflicts() {
        let (store, attack) = seeded();
        let batch = vec![Task::pending(&attack, PriorityClass::Normal, KeyRange::new(0, 10))];
        block_on(store.insert_tasks(attack.id, batch.clone())).unwrap();

        let again = block_on(store.insert_tasks(attack.id, batch));
        assert!(matches!(again, Err(StoreError::Conflict(_))));
        assert_eq!(store.task_count(), 1);
    }

    #[test]
    fn swap_with_stale_revision_is_refused() {
        let (store, attack) = seeded();
        let task = Task::pending(&attack, PriorityClass::Normal, KeyRange::new(0, 10));
        block_on(store.insert_tasks(attack.id, vec![task.clone()])).unwrap();

        let mut next = task.clone();
        next.attempts = 1;
        assert!(block_on(store.swap_task(0, next.clone())).unwrap());
        assert!(!block_on(store.swap_task(0, next)).unwrap());

        let stored = block_on(store.task(task.id)).unwrap().unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(stored.attempts, 1);
    }

    #[test]
    fn mark_published_keeps_revision() {
        let (store, attack) = seeded();
        let task = Task::pending(&attack, PriorityClass::Normal, KeyRange::new(0, 10));
        block_on(store.insert_tasks(attack.id, vec![task.clone()])).unwrap();
        assert_eq!(block_on(store.unpublished_tasks()).unwrap().len(), 1);

        block_on(store.mark_published(vec![(task.id, 0), (Uuid::new_v4(), 0)])).unwrap();

        assert!(block_on(store.unpublished_tasks()).unwrap().is_empty());
        let stored = block_on(store.task(task.id)).unwrap().unwrap();
        assert_eq!(stored.revision, 0);
        assert!(!stored.awaiting_publish);
    }

    #[test]
    fn mark_published_skips_rewritten_tasks() {
        let (store, attack) = seeded();
        let task = Task::pending(&attack, PriorityClass::Normal, KeyRange::new(0, 10));
        block_on(store.insert_tasks(attack.id, vec![task.clone()])).unwrap();
        assert!(block_on(store.swap_task(0, task.clone())).unwrap());

        block_on(store.mark_published(vec![(task.id, 0)])).unwrap();

        assert_eq!(block_on(store.unpublished_tasks()).unwrap().len(), 1);
    }
}
