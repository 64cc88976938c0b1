//! Generation counter for cooperative cancellation
//!
//! Every zoom switch (and every new mosaic) advances the generation. Fetch
//! jobs capture the generation they were issued under; a job or result whose
//! generation no longer matches is stale and gets ignored. In-flight network
//! calls are never aborted, only their results.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Shared, monotonically increasing generation
///
/// Clones observe the same counter, so workers can check staleness without
/// going through the session.
///
/// # Example
///
/// ```
/// use mosaic_scheduler::GenerationCounter;
///
/// let counter = GenerationCounter::new();
/// let issued = counter.current();
/// let worker_view = counter.clone();
///
/// counter.advance();
/// assert!(!worker_view.is_current(issued));
/// ```
#[derive(Debug, Clone, Default)]
pub struct GenerationCounter {
    value: Arc<AtomicU64>,
}

impl GenerationCounter {
    /// Create a counter starting at generation 0
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Start a new generation and return it
    pub fn advance(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }

    /// Token for a job issued under the current generation
    pub fn token(&self) -> JobToken {
        self.token_for(self.current())
    }

    pub fn token_for(&self, generation: u64) -> JobToken {
        JobToken { generation, counter: self.clone() }
    }
}

/// Staleness check handed to a running job
///
/// Executors should check [`JobToken::is_stale`] between expensive steps
/// (after the network fetch, before decoding) and give up early.
#[derive(Debug, Clone)]
pub struct JobToken {
    generation: u64,
    counter: GenerationCounter,
}

impl JobToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_stale(&self) -> bool {
        !self.counter.is_current(self.generation)
    }
}
