//! Priority-based fetch queue
//!
//! Fetch jobs are ordered by priority (metadata, then visible tiles, then
//! margin tiles) and FIFO within the same priority.

use mosaic_cache::FetchTicket;
use mosaic_render::CellCoord;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Fetch priority levels
///
/// Higher numeric values have higher priority and are executed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FetchPriority {
    /// Tile inside the prefetch margin but outside the viewport
    Margin = 0,

    /// Tile intersecting the viewport
    Visible = 1,

    /// Mosaic metadata; nothing can be shown without it
    Metadata = 2,
}

/// Unique job identifier
pub type JobId = u64;

/// Mosaic a tile job belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MosaicKey {
    pub image_id: String,

    /// Tile file extension, e.g. `"jpg"`
    pub extension: String,
}

impl MosaicKey {
    pub fn new(image_id: impl Into<String>, extension: impl Into<String>) -> Self {
        Self { image_id: image_id.into(), extension: extension.into() }
    }
}

/// What a job fetches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchKind {
    /// Zoom-level catalog for an image
    Metadata { image_id: String },

    /// One tile payload
    Tile {
        mosaic: MosaicKey,
        zoom_index: u32,
        cell: CellCoord,
        ticket: FetchTicket,
    },
}

impl FetchKind {
    /// Cell addressed by a tile job
    pub fn cell(&self) -> Option<CellCoord> {
        match self {
            FetchKind::Tile { cell, .. } => Some(*cell),
            FetchKind::Metadata { .. } => None,
        }
    }
}

/// A queued fetch
#[derive(Debug, Clone)]
pub struct FetchJob {
    /// Unique job identifier
    pub id: JobId,

    /// Job priority level
    pub priority: FetchPriority,

    /// Generation the job was issued under
    pub generation: u64,

    /// What to fetch
    pub kind: FetchKind,

    /// Insertion order (used for FIFO within same priority)
    insertion_order: u64,
}

impl PartialEq for FetchJob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FetchJob {}

impl PartialOrd for FetchJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FetchJob {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max heap: earlier insertions must compare greater
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            other => other,
        }
    }
}

/// Thread-safe fetch queue
///
/// Workers block in [`FetchQueue::pop_timeout`] until a job arrives or the
/// timeout elapses.
pub struct FetchQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

struct QueueState {
    heap: BinaryHeap<FetchJob>,
    next_job_id: JobId,
    insertion_counter: u64,
    closed: bool,
}

impl FetchQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_job_id: 1,
                insertion_counter: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a job and wake one waiting worker. Returns the assigned job ID.
    pub fn push(&self, priority: FetchPriority, generation: u64, kind: FetchKind) -> JobId {
        let mut state = self.lock();
        let id = state.next_job_id;
        state.next_job_id += 1;
        let insertion_order = state.insertion_counter;
        state.insertion_counter += 1;

        state.heap.push(FetchJob { id, priority, generation, kind, insertion_order });
        drop(state);

        self.available.notify_one();
        id
    }

    /// Pop the highest priority job, or `None` if the queue is empty
    pub fn pop(&self) -> Option<FetchJob> {
        self.lock().heap.pop()
    }

    /// Pop the highest priority job, waiting up to `timeout` for one
    ///
    /// Returns immediately once the queue is closed.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<FetchJob> {
        let state = self.lock();
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |state| state.heap.is_empty() && !state.closed)
            .unwrap_or_else(PoisonError::into_inner);
        state.heap.pop()
    }

    /// Stop blocking in [`FetchQueue::pop_timeout`] and wake every waiter
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    pub fn clear(&self) {
        self.lock().heap.clear();
    }

    /// Remove all jobs matching a predicate
    ///
    /// Returns the number of jobs removed.
    pub fn remove_if<F>(&self, predicate: F) -> usize
    where
        F: Fn(&FetchJob) -> bool,
    {
        let mut state = self.lock();
        let original_len = state.heap.len();
        state.heap.retain(|job| !predicate(job));
        original_len - state.heap.len()
    }

    /// Snapshot of queued jobs in arbitrary order
    pub fn jobs(&self) -> Vec<FetchJob> {
        self.lock().heap.iter().cloned().collect()
    }
}

impl Default for FetchQueue {
    fn default() -> Self {
        Self::new()
    }
}
