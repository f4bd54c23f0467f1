// src/router/lanes.rs

//! Message-delivery collaborator: three independent priority lanes.
//!
//! Lanes carry task ids only; the store remains the source of truth for a
//! task's state. Delivery is at-least-once, so consumers must tolerate ids
//! whose task is no longer pending (the claim swap filters them out).

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use crate::types::{PriorityClass, TaskId};

/// Errors that can occur during lane operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LaneError {
    /// The delivery substrate is temporarily unreachable. Retried with backoff.
    #[error("lane backend unavailable: {0}")]
    Unavailable(String),

    #[error("lane {lane} full: {current}/{max} pending tasks")]
    Full {
        lane: PriorityClass,
        current: usize,
        max: usize,
    },
}

impl LaneError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LaneError::Unavailable(_))
    }
}

pub type LaneResult<T> = Result<T, LaneError>;

/// Type alias for async lane futures.
pub type LaneFuture<'a, T> = Pin<Box<dyn Future<Output = LaneResult<T>> + Send + 'a>>;

/// Trait for lane backends.
pub trait LaneBackend: Send + Sync {
    /// Append a batch to the tail of a lane. A batch is accepted whole or
    /// rejected whole.
    fn publish(&self, lane: PriorityClass, batch: Vec<TaskId>) -> LaneFuture<'_, ()>;

    /// Take the id at the head of a lane, if any.
    fn pull(&self, lane: PriorityClass) -> LaneFuture<'_, Option<TaskId>>;

    /// Number of ids waiting on a lane.
    fn depth(&self, lane: PriorityClass) -> LaneFuture<'_, usize>;
}

/// In-memory lanes for single-node deployments and tests.
///
/// FIFO per lane. All state is lost on restart.
pub struct MemoryLanes {
    lanes: Mutex<[VecDeque<TaskId>; 3]>,
    max_depth: usize,
    total_published: AtomicUsize,
    total_pulled: AtomicUsize,
}

impl MemoryLanes {
    pub fn new(max_depth: usize) -> Self {
        Self {
            lanes: Mutex::new([VecDeque::new(), VecDeque::new(), VecDeque::new()]),
            max_depth,
            total_published: AtomicUsize::new(0),
            total_pulled: AtomicUsize::new(0),
        }
    }

    /// Unbounded lanes.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    pub fn total_published(&self) -> usize {
        self.total_published.load(Ordering::Relaxed)
    }

    pub fn total_pulled(&self) -> usize {
        self.total_pulled.load(Ordering::Relaxed)
    }
}

impl Default for MemoryLanes {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl std::fmt::Debug for MemoryLanes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lanes = self.lanes.lock();
        f.debug_struct("MemoryLanes")
            .field("high", &lanes[0].len())
            .field("normal", &lanes[1].len())
            .field("low", &lanes[2].len())
            .finish_non_exhaustive()
    }
}

impl LaneBackend for MemoryLanes {
    fn publish(&self, lane: PriorityClass, batch: Vec<TaskId>) -> LaneFuture<'_, ()> {
        let result = {
            let mut lanes = self.lanes.lock();
            let queue = &mut lanes[lane.index()];

            if queue.len().saturating_add(batch.len()) > self.max_depth {
                Err(LaneError::Full {
                    lane,
                    current: queue.len(),
                    max: self.max_depth,
                })
            } else {
                self.total_published.fetch_add(batch.len(), Ordering::Relaxed);
                queue.extend(batch);
                Ok(())
            }
        };

        Box::pin(async move { result })
    }

    fn pull(&self, lane: PriorityClass) -> LaneFuture<'_, Option<TaskId>> {
        let next = self.lanes.lock()[lane.index()].pop_front();
        if next.is_some() {
            self.total_pulled.fetch_add(1, Ordering::Relaxed);
        }
        Box::pin(async move { Ok(next) })
    }

    fn depth(&self, lane: PriorityClass) -> LaneFuture<'_, usize> {
        let depth = self.lanes.lock()[lane.index()].len();
        Box::pin(async move { Ok(depth) })
    }
}
