//! Fetch scheduler implementation
//!
//! Owns the fetch queue, the worker pool and the completion channel. The
//! session calls into the scheduler from its own thread; workers only see
//! the queue, the generation counter and the completion sender.

use crate::generation::GenerationCounter;
use crate::priority::{FetchJob, FetchKind, FetchPriority, FetchQueue, JobId, MosaicKey};
use crate::worker::{
    FetchCompletion, FetchExecutor, JobCounters, JobRunner, WorkerPool, WorkerPoolConfig,
};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, TryRecvError};
use log::{debug, trace};
use mosaic_cache::{EvictOutcome, FetchTicket, RetryPolicy, TileGrid};
use mosaic_render::CellCoord;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fetch scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Total jobs submitted
    pub submitted: u64,

    /// Jobs that produced a successful result
    pub completed: u64,

    /// Jobs that produced an error result
    pub failed: u64,

    /// Jobs dropped because their generation went stale
    pub skipped: u64,

    /// Jobs removed from the queue before they started
    pub cancelled: u64,

    /// Current queue size
    pub queue_size: usize,
}

impl SchedulerStats {
    /// Jobs submitted but not yet accounted for (queued or executing)
    pub fn in_flight(&self) -> u64 {
        self.submitted
            .saturating_sub(self.completed + self.failed + self.skipped + self.cancelled)
    }
}

/// Fetch scheduler with priority queue and worker pool
///
/// With zero workers the scheduler runs in manual mode: nothing executes
/// until the caller drives jobs through [`FetchScheduler::next_job`] and
/// [`FetchScheduler::execute`] (or [`FetchScheduler::run_queued`]).
///
/// # Example
///
/// ```
/// use mosaic_cache::{RetryPolicy, TileGrid, TileStatus};
/// use mosaic_render::{CellCoord, TileImage, ZoomLevel};
/// use mosaic_scheduler::{FetchJob, FetchPriority, FetchScheduler, JobOutput, JobToken, MosaicKey};
/// use std::sync::Arc;
/// use std::time::{Duration, Instant};
///
/// let executor = Arc::new(|_job: &FetchJob, _token: &JobToken| {
///     Some(JobOutput::Tile(Ok(TileImage::new(1, 1, vec![0; 4]))))
/// });
/// let scheduler = FetchScheduler::new(executor, 0, Duration::from_millis(10)).unwrap();
///
/// let level = ZoomLevel::new(0, 100.0, 256.0, 256.0, 2, 2);
/// let mut grid = TileGrid::new(level, scheduler.generation());
/// let key = MosaicKey::new("img", "jpg");
/// let cell = CellCoord::new(0, 1);
/// let policy = RetryPolicy::immediate();
///
/// let ticket = scheduler.ensure_loaded(&mut grid, &key, cell, FetchPriority::Visible, &policy, Instant::now());
/// assert!(ticket.is_some());
/// // A second request while loading is a no-op
/// assert!(scheduler.ensure_loaded(&mut grid, &key, cell, FetchPriority::Visible, &policy, Instant::now()).is_none());
///
/// assert_eq!(scheduler.run_queued(), 1);
/// let completion = scheduler.try_recv().unwrap();
/// assert_eq!(completion.kind.cell(), Some(cell));
/// assert_eq!(grid.status(cell), TileStatus::Loading);
/// ```
pub struct FetchScheduler {
    queue: Arc<FetchQueue>,
    generation: GenerationCounter,
    runner: JobRunner,
    completions: Receiver<FetchCompletion>,
    counters: Arc<JobCounters>,
    next_ticket: AtomicU64,
    pool: Option<WorkerPool>,
}

impl FetchScheduler {
    /// Create a scheduler and start `num_workers` fetch threads
    ///
    /// Fails only when a worker thread cannot be spawned.
    pub fn new(
        executor: FetchExecutor,
        num_workers: usize,
        poll_interval: Duration,
    ) -> io::Result<Self> {
        Self::with_config(
            executor,
            WorkerPoolConfig::new(num_workers).with_poll_interval(poll_interval),
        )
    }

    pub fn with_config(executor: FetchExecutor, config: WorkerPoolConfig) -> io::Result<Self> {
        let queue = Arc::new(FetchQueue::new());
        let generation = GenerationCounter::new();
        let counters = Arc::new(JobCounters::default());
        let (sender, completions) = unbounded();
        let runner = JobRunner::new(executor, generation.clone(), sender, Arc::clone(&counters));

        let pool = if config.num_workers > 0 {
            Some(WorkerPool::new(Arc::clone(&queue), runner.clone(), &config)?)
        } else {
            None
        };
        debug!("fetch scheduler started with {} workers", config.num_workers);

        Ok(Self {
            queue,
            generation,
            runner,
            completions,
            counters,
            next_ticket: AtomicU64::new(1),
            pool,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation.current()
    }

    /// Shared counter, for executors that want to check staleness themselves
    pub fn generation_counter(&self) -> GenerationCounter {
        self.generation.clone()
    }

    /// Start a new generation and drop every queued job of older ones
    ///
    /// Jobs already executing are not interrupted; their results carry the
    /// old generation and are discarded when applied.
    pub fn advance_generation(&self) -> u64 {
        let generation = self.generation.advance();
        let purged = self.queue.remove_if(|job| job.generation < generation);
        self.counters.cancelled.fetch_add(purged as u64, Ordering::Relaxed);
        debug!("advanced to generation {} ({} queued jobs purged)", generation, purged);
        generation
    }

    /// Queue a metadata fetch under the current generation
    pub fn submit_metadata(&self, image_id: &str) -> JobId {
        self.submit(
            FetchPriority::Metadata,
            self.generation(),
            FetchKind::Metadata { image_id: image_id.to_string() },
        )
    }

    /// Queue a tile fetch under the current generation and return its ticket
    ///
    /// This does not touch any grid; prefer [`FetchScheduler::ensure_loaded`],
    /// which also moves the cell to loading.
    pub fn submit_tile(
        &self,
        mosaic: &MosaicKey,
        zoom_index: u32,
        cell: CellCoord,
        priority: FetchPriority,
    ) -> FetchTicket {
        let ticket = self.allocate_ticket();
        self.enqueue_tile(mosaic, zoom_index, cell, ticket, priority, self.generation());
        ticket
    }

    /// Issue a fetch for `cell` if it is absent or retryable
    ///
    /// Returns the ticket of the new fetch, or `None` when the cell is
    /// already loading, loaded, or waiting out its retry backoff.
    pub fn ensure_loaded(
        &self,
        grid: &mut TileGrid,
        mosaic: &MosaicKey,
        cell: CellCoord,
        priority: FetchPriority,
        policy: &RetryPolicy,
        now: Instant,
    ) -> Option<FetchTicket> {
        if !grid.is_retryable(cell, now, policy) {
            return None;
        }

        let ticket = self.allocate_ticket();
        if !grid.begin_loading(cell, ticket, now, policy) {
            return None;
        }

        self.enqueue_tile(
            mosaic,
            grid.zoom_level().index,
            cell,
            ticket,
            priority,
            grid.generation(),
        );
        Some(ticket)
    }

    /// Evict `cell` from `grid`, dropping its queued fetch if it has one
    pub fn evict(&self, grid: &mut TileGrid, cell: CellCoord) -> EvictOutcome {
        let outcome = grid.evict(cell);
        if outcome == EvictOutcome::Abandoned {
            self.cancel_queued(cell);
        }
        outcome
    }

    /// Drop not-yet-started tile jobs for `cell`. Returns the number removed.
    pub fn cancel_queued(&self, cell: CellCoord) -> usize {
        let removed = self.queue.remove_if(|job| job.kind.cell() == Some(cell));
        if removed > 0 {
            self.counters.cancelled.fetch_add(removed as u64, Ordering::Relaxed);
            trace!("cancelled {} queued job(s) for cell {}", removed, cell);
        }
        removed
    }

    /// Pop the next job for manual execution
    pub fn next_job(&self) -> Option<FetchJob> {
        self.queue.pop()
    }

    /// Execute a job on the calling thread
    ///
    /// Returns whether a completion was posted (stale jobs are skipped).
    pub fn execute(&self, job: FetchJob) -> bool {
        self.runner.run(job)
    }

    /// Execute every queued job on the calling thread, in priority order
    pub fn run_queued(&self) -> usize {
        let mut posted = 0;
        while let Some(job) = self.next_job() {
            if self.execute(job) {
                posted += 1;
            }
        }
        posted
    }

    pub fn try_recv(&self) -> Option<FetchCompletion> {
        match self.completions.try_recv() {
            Ok(completion) => Some(completion),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait up to `timeout` for the next completion
    pub fn recv_timeout(&self, timeout: Duration) -> Option<FetchCompletion> {
        match self.completions.recv_timeout(timeout) {
            Ok(completion) => Some(completion),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn pending_jobs(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_jobs_list(&self) -> Vec<FetchJob> {
        self.queue.jobs()
    }

    pub fn num_workers(&self) -> usize {
        self.pool.as_ref().map_or(0, WorkerPool::num_workers)
    }

    pub fn is_manual(&self) -> bool {
        self.pool.is_none()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            queue_size: self.queue.len(),
        }
    }

    fn allocate_ticket(&self) -> FetchTicket {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }

    fn enqueue_tile(
        &self,
        mosaic: &MosaicKey,
        zoom_index: u32,
        cell: CellCoord,
        ticket: FetchTicket,
        priority: FetchPriority,
        generation: u64,
    ) -> JobId {
        trace!(
            "queueing {:?} fetch for cell {} at zoom {} (ticket {})",
            priority,
            cell,
            zoom_index,
            ticket
        );
        self.submit(
            priority,
            generation,
            FetchKind::Tile { mosaic: mosaic.clone(), zoom_index, cell, ticket },
        )
    }

    fn submit(&self, priority: FetchPriority, generation: u64, kind: FetchKind) -> JobId {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.queue.push(priority, generation, kind)
    }
}

impl Drop for FetchScheduler {
    fn drop(&mut self) {
        // Join workers before the queue and channel go away
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}
