// src/keyspace/mod.rs

//! Keyspace sizing and partitioning.
//!
//! - [`estimator`] turns an attack's mode + parameters into a total count of
//!   candidate units (the pluggable keyspace-size collaborator).
//! - [`partition`] slices `[0, total)` into ordered, gap-free task ranges.

pub mod estimator;
pub mod partition;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use estimator::{DescriptorEstimator, KeyspaceEstimator, mask_size};
pub use partition::{partition, Partition};

/// Mode + parameters of an attack, sufficient to size its keyspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum KeyspaceDescriptor {
    /// Every word, optionally multiplied by a rule set.
    Dictionary {
        wordlist_size: u64,
        #[serde(default)]
        rule_count: u64,
    },
    /// Brute force over a hashcat-style mask such as `?u?l?l?d?d`.
    Mask { mask: String },
    /// Every word combined with every mask candidate.
    Hybrid { wordlist_size: u64, mask: String },
    /// Keyspace size supplied verbatim by the caller.
    Explicit { total: u64 },
}

impl KeyspaceDescriptor {
    pub fn mode(&self) -> &'static str {
        match self {
            KeyspaceDescriptor::Dictionary { .. } => "dictionary",
            KeyspaceDescriptor::Mask { .. } => "mask",
            KeyspaceDescriptor::Hybrid { .. } => "hybrid",
            KeyspaceDescriptor::Explicit { .. } => "explicit",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyspaceError {
    #[error("invalid mask '{mask}': {reason}")]
    InvalidMask { mask: String, reason: String },

    #[error("keyspace of {mode} attack overflows u64")]
    Overflow { mode: &'static str },

    #[error("keyspace splits into {tasks} tasks, more than the limit of {max}")]
    TooManyTasks { tasks: u64, max: u64 },
}
