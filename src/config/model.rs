// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::engine::FleetSettings;
use crate::keyspace::KeyspaceDescriptor;
use crate::model::CampaignDefinition;
use crate::types::PriorityClass;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [scheduler]
/// task_size = 1000000
/// lease_secs = 600
/// max_attempts = 3
/// max_tasks_per_attack = 1000000
///
/// [liveness]
/// sweep_interval_secs = 60
/// offline_threshold_secs = 300
///
/// [campaign.rockyou]
/// priority = "high"
///
/// [[campaign.rockyou.attack]]
/// name = "wordlist"
/// mode = "dictionary"
/// wordlist_size = 14344391
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawFleetConfig {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub liveness: LivenessSection,

    #[serde(default)]
    pub retry: RetrySection,

    /// Campaigns from `[campaign.<name>]`, keyed by name.
    #[serde(default)]
    pub campaign: BTreeMap<String, RawCampaignConfig>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Units of keyspace per task.
    #[serde(default = "default_task_size")]
    pub task_size: u64,

    /// Lease granted on claim, in seconds.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// A task failing more often than this is failed for good.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Upper bound on the tasks one attack may split into.
    #[serde(default = "default_max_tasks_per_attack")]
    pub max_tasks_per_attack: u64,
}

fn default_task_size() -> u64 {
    1_000_000
}

fn default_lease_secs() -> u64 {
    600
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_tasks_per_attack() -> u64 {
    1_000_000
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            task_size: default_task_size(),
            lease_secs: default_lease_secs(),
            max_attempts: default_max_attempts(),
            max_tasks_per_attack: default_max_tasks_per_attack(),
        }
    }
}

/// `[liveness]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct LivenessSection {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_offline_threshold_secs")]
    pub offline_threshold_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_offline_threshold_secs() -> u64 {
    300
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            offline_threshold_secs: default_offline_threshold_secs(),
        }
    }
}

/// `[retry]` section: backoff for store and lane calls.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// `[campaign.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCampaignConfig {
    #[serde(default)]
    pub priority: PriorityClass,

    /// `[[campaign.<name>.attack]]` entries, in order. An attack's position
    /// in this list is what `after` refers to.
    #[serde(default)]
    pub attack: Vec<RawAttackConfig>,
}

/// `[[campaign.<name>.attack]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RawAttackConfig {
    pub name: String,

    /// `mode = "..."` plus the parameters that mode needs.
    #[serde(flatten)]
    pub keyspace: KeyspaceDescriptor,

    /// Positions of attacks that must complete before this one runs.
    #[serde(default)]
    pub after: Vec<usize>,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    pub settings: FleetSettings,
    pub campaigns: Vec<CampaignDefinition>,
}
