// src/store/mod.rs

//! Persistence collaborator.
//!
//! The scheduler never caches mutable task or agent state between
//! operations. Every read goes to the store and every mutation of a task or
//! agent is a compare-and-swap on the record's `revision`:
//!
//! - claim swaps a task that was read as `pending`,
//! - report swaps a task that was read as held by the reporting agent,
//! - reclaim swaps a task that was read as held by an offline agent or with
//!   an expired lease.
//!
//! A failed swap means another instance got there first; callers turn that
//! into a "precondition failed" outcome rather than an error.
//!
//! - [`memory`] provides a single-process implementation used by the binary
//!   and by tests.

pub mod memory;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::model::{Agent, Attack, Campaign, Task};
use crate::types::{AttackId, AttackStatus, CampaignId, CampaignStatus, TaskId};

pub use memory::MemoryStore;

/// Errors that can occur during store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store is temporarily unreachable. Retried with backoff.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("record not found: {0}")]
    NotFound(String),

    /// The write would violate an invariant of the stored data.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Type alias for async store futures.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Read/write access to campaigns, attacks, tasks and agents.
pub trait FleetStore: Send + Sync {
    /// Insert a campaign together with its attacks (ordered by position).
    fn insert_campaign(&self, campaign: Campaign, attacks: Vec<Attack>) -> StoreFuture<'_, ()>;

    fn campaign(&self, id: CampaignId) -> StoreFuture<'_, Option<Campaign>>;

    /// Move a campaign from `from` to `to`. Returns `false` if the stored
    /// status was not `from`.
    fn transition_campaign(
        &self,
        id: CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> StoreFuture<'_, bool>;

    /// Attacks of a campaign ordered by position.
    fn attacks(&self, campaign: CampaignId) -> StoreFuture<'_, Vec<Attack>>;

    /// Every attack, across campaigns, currently in `status`.
    fn attacks_in(&self, status: AttackStatus) -> StoreFuture<'_, Vec<Attack>>;

    fn attack(&self, id: AttackId) -> StoreFuture<'_, Option<Attack>>;

    /// Move an attack from `from` to `to`. Returns `false` if the stored
    /// status was not `from`.
    fn transition_attack(
        &self,
        id: AttackId,
        from: AttackStatus,
        to: AttackStatus,
    ) -> StoreFuture<'_, bool>;

    /// Commit every task of an attack at once.
    ///
    /// Either all tasks become visible or none do. Fails with
    /// [`StoreError::Conflict`] if the attack already has tasks.
    fn insert_tasks(&self, attack: AttackId, tasks: Vec<Task>) -> StoreFuture<'_, ()>;

    fn task(&self, id: TaskId) -> StoreFuture<'_, Option<Task>>;

    /// Tasks of an attack ordered by range start.
    fn tasks_of_attack(&self, attack: AttackId) -> StoreFuture<'_, Vec<Task>>;

    /// Tasks currently `assigned` or `running`.
    fn held_tasks(&self) -> StoreFuture<'_, Vec<Task>>;

    /// Tasks `agent` currently holds.
    fn tasks_held_by(&self, agent: &str) -> StoreFuture<'_, Vec<Task>>;

    /// Pending tasks whose `awaiting_publish` flag is still set.
    fn unpublished_tasks(&self) -> StoreFuture<'_, Vec<Task>>;

    /// Clear `awaiting_publish` once task ids are on a lane.
    ///
    /// Each entry is `(id, revision)` as published; a task rewritten since
    /// keeps its flag. Bookkeeping only: the revision is left unchanged, so
    /// no concurrent claim or report loses its swap because of it. Unknown
    /// ids are ignored.
    fn mark_published(&self, published: Vec<(TaskId, u64)>) -> StoreFuture<'_, ()>;

    /// Replace a task if its stored revision equals `expected_revision`.
    ///
    /// On success the stored revision becomes `expected_revision + 1`.
    fn swap_task(&self, expected_revision: u64, next: Task) -> StoreFuture<'_, bool>;

    /// Insert an agent unless one with the same id exists; returns the stored
    /// record either way.
    fn register_agent(&self, agent: Agent) -> StoreFuture<'_, Agent>;

    fn agent(&self, id: &str) -> StoreFuture<'_, Option<Agent>>;

    fn agents(&self) -> StoreFuture<'_, Vec<Agent>>;

    /// Replace an agent if its stored revision equals `expected_revision`.
    fn swap_agent(&self, expected_revision: u64, next: Agent) -> StoreFuture<'_, bool>;
}
