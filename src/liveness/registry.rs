// src/liveness/registry.rs

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::errors::{FleetError, Result};
use crate::model::Agent;
use crate::notify::{FleetEvent, Notifier};
use crate::router::RetryPolicy;
use crate::store::FleetStore;
use crate::types::AgentStatus;

/// Bounded number of read-modify-write rounds a heartbeat makes when it
/// races another writer on the same agent.
const HEARTBEAT_ROUNDS: usize = 8;

/// Registration and heartbeat intake for agents.
pub struct AgentRegistry {
    store: Arc<dyn FleetStore>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn FleetStore>, notifier: Arc<dyn Notifier>, retry: RetryPolicy) -> Self {
        Self {
            store,
            notifier,
            retry,
        }
    }

    /// Register an agent.
    ///
    /// Re-registering an existing id returns the stored record unchanged;
    /// capabilities are fixed by the first registration.
    pub async fn register_agent(
        &self,
        id: &str,
        capabilities: BTreeSet<String>,
    ) -> Result<Agent> {
        let candidate = Agent::new(id, capabilities, Utc::now());
        let stored = self
            .retry
            .run("register_agent", || self.store.register_agent(candidate.clone()))
            .await?;

        if stored.revision == 0 && stored.last_seen_at == candidate.last_seen_at {
            info!(agent = %id, capabilities = ?stored.capabilities, "agent registered");
        } else {
            debug!(agent = %id, "agent already registered");
        }
        Ok(stored)
    }

    pub async fn heartbeat(&self, id: &str) -> Result<Agent> {
        self.heartbeat_at(id, Utc::now()).await
    }

    /// Record that `id` was seen at `now`.
    ///
    /// An agent that was marked offline (or errored) comes back online.
    /// `last_seen_at` never moves backwards.
    pub async fn heartbeat_at(&self, id: &str, now: DateTime<Utc>) -> Result<Agent> {
        for _ in 0..HEARTBEAT_ROUNDS {
            let agent = self
                .retry
                .run("heartbeat.load", || self.store.agent(id))
                .await?
                .ok_or_else(|| FleetError::AgentNotFound(id.to_string()))?;

            let previous = agent.status;
            let revision = agent.revision;
            let mut next = agent;
            next.last_seen_at = next.last_seen_at.max(now);
            if !previous.is_live() {
                next.status = AgentStatus::Online;
            }

            let written = self
                .retry
                .run("heartbeat.swap", || self.store.swap_agent(revision, next.clone()))
                .await?;
            if !written {
                debug!(agent = %id, "heartbeat raced another update; retrying");
                continue;
            }

            if previous != next.status {
                info!(agent = %id, from = ?previous, "agent back online");
                self.notifier.notify(FleetEvent::AgentStatusChanged {
                    agent: id.to_string(),
                    from: previous,
                    to: next.status,
                });
            }
            next.revision = revision + 1;
            return Ok(next);
        }

        Err(FleetError::InvalidTransition(format!(
            "heartbeat for agent {id} kept losing concurrent updates"
        )))
    }
}
