#![allow(dead_code)]

use std::collections::BTreeSet;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use fleetsched::engine::{Collaborators, Fleet, FleetSettings};
use fleetsched::keyspace::{DescriptorEstimator, KeyspaceDescriptor};
use fleetsched::liveness::LivenessSettings;
use fleetsched::model::{AttackDefinition, CampaignDefinition};
use fleetsched::router::{LaneBackend, MemoryLanes, RetryPolicy, RouterSettings};
use fleetsched::store::{FleetStore, MemoryStore};
use fleetsched::types::PriorityClass;

use crate::fakes::RecordingNotifier;

/// Builder for `CampaignDefinition` to simplify test setup.
pub struct CampaignBuilder {
    campaign: CampaignDefinition,
}

impl CampaignBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            campaign: CampaignDefinition {
                name: name.to_string(),
                priority: PriorityClass::Normal,
                attacks: Vec::new(),
            },
        }
    }

    pub fn priority(mut self, priority: PriorityClass) -> Self {
        self.campaign.priority = priority;
        self
    }

    /// Append an attack with an explicit keyspace size.
    pub fn attack(self, name: &str, total: u64, deps: &[usize]) -> Self {
        self.attack_with(name, KeyspaceDescriptor::Explicit { total }, deps)
    }

    pub fn attack_with(mut self, name: &str, keyspace: KeyspaceDescriptor, deps: &[usize]) -> Self {
        self.campaign.attacks.push(AttackDefinition {
            name: name.to_string(),
            deps: deps.to_vec(),
            keyspace,
        });
        self
    }

    pub fn build(self) -> CampaignDefinition {
        self.campaign
    }
}

/// Settings with small tasks and near-instant retries.
pub fn test_settings(task_size: u64) -> FleetSettings {
    FleetSettings {
        task_size: NonZeroU64::new(task_size).expect("task size must be > 0"),
        max_tasks_per_attack: 1_000_000,
        router: RouterSettings {
            lease: chrono::Duration::minutes(10),
            max_attempts: 3,
        },
        liveness: LivenessSettings {
            sweep_interval: Duration::from_secs(60),
            offline_threshold: chrono::Duration::minutes(5),
        },
        retry: RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(5),
        },
    }
}

/// A fleet over in-memory collaborators, with handles kept for assertions.
pub struct TestFleet {
    pub fleet: Fleet,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestFleet {
    pub fn new(settings: FleetSettings) -> Self {
        Self::with_lanes(settings, Arc::new(MemoryLanes::unbounded()))
    }

    pub fn with_lanes(settings: FleetSettings, lanes: Arc<dyn LaneBackend>) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::with_parts(settings, store.clone(), store, lanes)
    }

    /// Run the fleet against `wrapper` (usually a fault-injecting layer over
    /// `store`) while keeping `store` for direct assertions.
    pub fn with_parts(
        settings: FleetSettings,
        store: Arc<MemoryStore>,
        wrapper: Arc<dyn FleetStore>,
        lanes: Arc<dyn LaneBackend>,
    ) -> Self {
        let notifier = RecordingNotifier::new();
        let fleet = Fleet::new(
            &settings,
            Collaborators {
                store: wrapper,
                lanes,
                notifier: notifier.clone(),
                estimator: Arc::new(DescriptorEstimator),
            },
        );
        Self {
            fleet,
            store,
            notifier,
        }
    }

    /// Register an agent with no capabilities.
    pub async fn agent(&self, id: &str) {
        self.fleet
            .registry
            .register_agent(id, BTreeSet::new())
            .await
            .expect("register agent");
    }

    pub async fn agent_with(&self, id: &str, capabilities: &[&str]) {
        let caps = capabilities.iter().map(|c| c.to_string()).collect();
        self.fleet
            .registry
            .register_agent(id, caps)
            .await
            .expect("register agent");
    }
}
