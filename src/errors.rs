// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::keyspace::KeyspaceError;
use crate::router::lanes::LaneError;
use crate::store::StoreError;
use crate::types::{AgentId, AttackId, CampaignId, TaskId};

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Cycle detected in attack graph of campaign '{campaign}': positions {cycle:?}")]
    DependencyCycle { campaign: String, cycle: Vec<usize> },

    #[error("Campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    #[error("Attack not found: {0}")]
    AttackNotFound(AttackId),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Agent not registered: {0}")]
    AgentNotFound(AgentId),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Keyspace error: {0}")]
    Keyspace(#[from] KeyspaceError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lane error: {0}")]
    Lane(#[from] LaneError),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        last_error: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FleetError>;
