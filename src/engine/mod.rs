// src/engine/mod.rs

//! Orchestration engine for fleetsched.
//!
//! This module ties together:
//! - the scheduling coordinator (campaign start, generation, settling)
//! - the liveness monitor and its periodic sweep
//! - the service loop that reacts to:
//!   - campaign start requests
//!   - sweep ticks and on-demand sweeps
//!   - shutdown signals
//!
//! [`Fleet`] wires the components over a shared set of collaborators;
//! [`runtime`] drives them.

use std::num::NonZeroU64;
use std::sync::Arc;

use crate::keyspace::KeyspaceEstimator;
use crate::liveness::{AgentRegistry, LivenessMonitor, LivenessSettings};
use crate::notify::Notifier;
use crate::router::{LaneBackend, RetryPolicy, RouterSettings, TaskRouter};
use crate::store::FleetStore;
use crate::types::CampaignId;

pub mod coordinator;
pub mod runtime;

pub use coordinator::{AttackProgress, CampaignProgress, SchedulingCoordinator};
pub use runtime::{FleetService, Runtime};

/// Events flowing into the runtime from the API layer, timers and signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// Validate and start a draft campaign.
    StartCampaign(CampaignId),
    /// Run a liveness sweep now, outside the regular period.
    SweepRequested,
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Tunables for every component, as loaded from configuration.
#[derive(Debug, Clone)]
pub struct FleetSettings {
    pub task_size: NonZeroU64,
    /// Attacks that would split into more tasks than this fail at
    /// generation instead of being materialized.
    pub max_tasks_per_attack: u64,
    pub router: RouterSettings,
    pub liveness: LivenessSettings,
    pub retry: RetryPolicy,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            task_size: NonZeroU64::new(1_000_000).unwrap_or(NonZeroU64::MIN),
            max_tasks_per_attack: 1_000_000,
            router: RouterSettings::default(),
            liveness: LivenessSettings::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// External collaborators the engine runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn FleetStore>,
    pub lanes: Arc<dyn LaneBackend>,
    pub notifier: Arc<dyn Notifier>,
    pub estimator: Arc<dyn KeyspaceEstimator>,
}

/// The scheduling components, constructed once and shared.
#[derive(Clone)]
pub struct Fleet {
    pub router: Arc<TaskRouter>,
    pub registry: Arc<AgentRegistry>,
    pub monitor: Arc<LivenessMonitor>,
    pub coordinator: Arc<SchedulingCoordinator>,
}

impl Fleet {
    pub fn new(settings: &FleetSettings, collaborators: Collaborators) -> Self {
        let Collaborators {
            store,
            lanes,
            notifier,
            estimator,
        } = collaborators;

        let router = Arc::new(TaskRouter::new(
            store.clone(),
            lanes,
            settings.router.clone(),
            settings.retry.clone(),
        ));
        let registry = Arc::new(AgentRegistry::new(
            store.clone(),
            notifier.clone(),
            settings.retry.clone(),
        ));
        let monitor = Arc::new(LivenessMonitor::new(
            store.clone(),
            router.clone(),
            notifier.clone(),
            settings.retry.clone(),
            settings.liveness.clone(),
        ));
        let coordinator = Arc::new(SchedulingCoordinator::new(
            store,
            router.clone(),
            estimator,
            notifier,
            settings.retry.clone(),
            settings.task_size,
            settings.max_tasks_per_attack,
        ));

        Self {
            router,
            registry,
            monitor,
            coordinator,
        }
    }
}
