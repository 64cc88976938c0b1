//! Fetch worker pool for parallel job execution.
//!
//! Workers pull jobs from the shared [`FetchQueue`], skip jobs whose
//! generation went stale while they were queued, run the rest through the
//! [`FetchExecutor`] and post the result to the completion channel. Workers
//! never touch the tile grid; the session applies completions on its own
//! thread.

use crate::error::TileFetchError;
use crate::generation::{GenerationCounter, JobToken};
use crate::priority::{FetchJob, FetchKind, FetchQueue, JobId};
use crossbeam_channel::Sender;
use log::{error, trace};
use mosaic_render::{MosaicMetadata, TileImage};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Boxed error produced by a fetch collaborator
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Callback executing one fetch job.
///
/// The callback receives the job and a token for its generation. It should
/// check `token.is_stale()` between expensive steps and return `None` to
/// abandon a job that became stale; `None` posts no completion.
pub type FetchExecutor = Arc<dyn Fn(&FetchJob, &JobToken) -> Option<JobOutput> + Send + Sync>;

/// Result of an executed job
#[derive(Debug)]
pub enum JobOutput {
    Metadata(Result<MosaicMetadata, BoxError>),
    Tile(Result<TileImage, TileFetchError>),
}

impl JobOutput {
    pub fn is_err(&self) -> bool {
        match self {
            JobOutput::Metadata(result) => result.is_err(),
            JobOutput::Tile(result) => result.is_err(),
        }
    }
}

/// Message posted to the session owner when a job finishes
#[derive(Debug)]
pub struct FetchCompletion {
    pub job_id: JobId,

    /// Generation the job was issued under
    pub generation: u64,

    pub kind: FetchKind,
    pub output: JobOutput,
}

/// Configuration for the fetch worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn. Zero means jobs are driven by the
    /// caller through `FetchScheduler::next_job` / `execute`.
    pub num_workers: usize,

    /// Maximum time a worker waits for a job before checking shutdown.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus(),
            poll_interval: Duration::from_millis(25),
        }
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self { num_workers, ..Self::default() }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Job counters shared between the scheduler and its workers
#[derive(Debug, Default)]
pub(crate) struct JobCounters {
    pub(crate) submitted: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) skipped: AtomicU64,
    pub(crate) cancelled: AtomicU64,
}

/// Everything needed to run a job, shared by workers and manual callers
#[derive(Clone)]
pub(crate) struct JobRunner {
    executor: FetchExecutor,
    generation: GenerationCounter,
    completions: Sender<FetchCompletion>,
    counters: Arc<JobCounters>,
}

impl JobRunner {
    pub(crate) fn new(
        executor: FetchExecutor,
        generation: GenerationCounter,
        completions: Sender<FetchCompletion>,
        counters: Arc<JobCounters>,
    ) -> Self {
        Self { executor, generation, completions, counters }
    }

    /// Execute `job` unless it is stale. Returns whether a completion was
    /// posted.
    pub(crate) fn run(&self, job: FetchJob) -> bool {
        let token = self.generation.token_for(job.generation);
        if token.is_stale() {
            trace!("skipping stale job {} (generation {})", job.id, job.generation);
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let output = match panic::catch_unwind(AssertUnwindSafe(|| (self.executor)(&job, &token))) {
            Ok(Some(output)) => output,
            Ok(None) => {
                trace!("job {} abandoned by executor", job.id);
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("job {} panicked: {}", job.id, message);
                panicked_output(&job.kind, message)
            }
        };

        if output.is_err() {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.completed.fetch_add(1, Ordering::Relaxed);
        }

        let completion = FetchCompletion {
            job_id: job.id,
            generation: job.generation,
            kind: job.kind,
            output,
        };
        // The receiver lives in the scheduler; it is only gone during teardown
        self.completions.send(completion).is_ok()
    }
}

/// Fetch worker pool.
///
/// Spawns named worker threads that pull jobs from the shared queue until
/// the pool is shut down. Dropping the pool signals shutdown and joins every
/// worker; a worker finishes its current job first.
pub struct WorkerPool {
    workers: Vec<Worker>,
    shutdown: Arc<AtomicBool>,
    queue: Arc<FetchQueue>,
}

impl WorkerPool {
    pub(crate) fn new(
        queue: Arc<FetchQueue>,
        runner: JobRunner,
        config: &WorkerPoolConfig,
    ) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = Self {
            workers: Vec::with_capacity(config.num_workers),
            shutdown: Arc::clone(&shutdown),
            queue: Arc::clone(&queue),
        };

        for id in 0..config.num_workers {
            // On failure the partially built pool is dropped, which joins
            // the workers spawned so far
            let worker = Worker::spawn(
                id,
                Arc::clone(&queue),
                runner.clone(),
                Arc::clone(&shutdown),
                config.poll_interval,
            )?;
            pool.workers.push(worker);
        }

        Ok(pool)
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Signal every worker to stop and wait for them to exit
    pub fn shutdown(self) {
        drop(self);
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.queue.close();

        for worker in self.workers.drain(..) {
            worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A single worker thread in the worker pool.
struct Worker {
    name: String,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        id: usize,
        queue: Arc<FetchQueue>,
        runner: JobRunner,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> io::Result<Self> {
        let name = format!("mosaic-fetch-worker-{}", id);
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::run(queue, runner, shutdown, poll_interval))?;

        Ok(Self { name, thread: Some(thread) })
    }

    fn run(
        queue: Arc<FetchQueue>,
        runner: JobRunner,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        while !shutdown.load(Ordering::Acquire) {
            if let Some(job) = queue.pop_timeout(poll_interval) {
                runner.run(job);
            }
        }
    }

    fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("{} panicked", self.name);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Error result standing in for a job whose executor panicked
fn panicked_output(kind: &FetchKind, message: String) -> JobOutput {
    let error: BoxError = format!("fetch panicked: {message}").into();
    match kind {
        FetchKind::Metadata { .. } => JobOutput::Metadata(Err(error)),
        FetchKind::Tile { .. } => JobOutput::Tile(Err(TileFetchError::Fetch(error))),
    }
}

fn num_cpus() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::{FetchPriority, MosaicKey};
    use crossbeam_channel::unbounded;
    use mosaic_render::CellCoord;
    use std::sync::Mutex;
    use std::time::Instant;

    fn tile(row: u32, col: u32, ticket: u64) -> FetchKind {
        FetchKind::Tile {
            mosaic: MosaicKey::new("img", "jpg"),
            zoom_index: 0,
            cell: CellCoord::new(row, col),
            ticket,
        }
    }

    fn pixel_executor() -> FetchExecutor {
        Arc::new(|_job: &FetchJob, _token: &JobToken| {
            Some(JobOutput::Tile(Ok(TileImage::new(1, 1, vec![0, 0, 0, 255]))))
        })
    }

    fn runner_with(
        executor: FetchExecutor,
    ) -> (JobRunner, GenerationCounter, crossbeam_channel::Receiver<FetchCompletion>, Arc<JobCounters>)
    {
        let (tx, rx) = unbounded();
        let generation = GenerationCounter::new();
        let counters = Arc::new(JobCounters::default());
        let runner = JobRunner::new(executor, generation.clone(), tx, Arc::clone(&counters));
        (runner, generation, rx, counters)
    }

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();
        assert!(config.num_workers > 0);
        assert_eq!(config.poll_interval, Duration::from_millis(25));
    }

    #[test]
    fn test_worker_pool_config_builder() {
        let config = WorkerPoolConfig::new(4).with_poll_interval(Duration::from_millis(50));
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_runner_posts_completion() {
        let (runner, _generation, rx, counters) = runner_with(pixel_executor());
        let queue = FetchQueue::new();
        queue.push(FetchPriority::Visible, 0, tile(1, 2, 9));

        assert!(runner.run(queue.pop().unwrap()));
        let completion = rx.try_recv().unwrap();
        assert_eq!(completion.generation, 0);
        assert_eq!(completion.kind.cell(), Some(CellCoord::new(1, 2)));
        assert!(!completion.output.is_err());
        assert_eq!(counters.completed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_runner_skips_stale_job() {
        let executed = Arc::new(Mutex::new(0));
        let executed_clone = Arc::clone(&executed);
        let executor: FetchExecutor = Arc::new(move |_job: &FetchJob, _token: &JobToken| {
            *executed_clone.lock().unwrap() += 1;
            None
        });
        let (runner, generation, rx, counters) = runner_with(executor);
        let queue = FetchQueue::new();
        queue.push(FetchPriority::Visible, 0, tile(0, 0, 1));
        generation.advance();

        assert!(!runner.run(queue.pop().unwrap()));
        assert_eq!(*executed.lock().unwrap(), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(counters.skipped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_runner_counts_failures() {
        let executor: FetchExecutor = Arc::new(|_job: &FetchJob, _token: &JobToken| {
            Some(JobOutput::Tile(Err(TileFetchError::Fetch("offline".into()))))
        });
        let (runner, _generation, rx, counters) = runner_with(executor);
        let queue = FetchQueue::new();
        queue.push(FetchPriority::Margin, 0, tile(0, 0, 1));

        assert!(runner.run(queue.pop().unwrap()));
        assert!(rx.try_recv().unwrap().output.is_err());
        assert_eq!(counters.failed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_runner_turns_panic_into_failure() {
        let executor: FetchExecutor = Arc::new(|job: &FetchJob, _token: &JobToken| -> Option<JobOutput> {
            if job.kind.cell().is_some() {
                panic!("decoder blew up");
            }
            panic!("{}", String::from("catalog blew up"));
        });
        let (runner, _generation, rx, counters) = runner_with(executor);
        let queue = FetchQueue::new();
        queue.push(FetchPriority::Visible, 0, tile(2, 3, 4));
        queue.push(FetchPriority::Metadata, 0, FetchKind::Metadata { image_id: "img".into() });

        assert!(runner.run(queue.pop().unwrap()));
        assert!(runner.run(queue.pop().unwrap()));

        match rx.try_recv().unwrap().output {
            JobOutput::Metadata(Err(e)) => assert!(e.to_string().contains("catalog blew up")),
            other => panic!("unexpected output {:?}", other),
        }
        let completion = rx.try_recv().unwrap();
        assert_eq!(completion.kind.cell(), Some(CellCoord::new(2, 3)));
        match completion.output {
            JobOutput::Tile(Err(e)) => assert!(e.to_string().contains("decoder blew up")),
            other => panic!("unexpected output {:?}", other),
        }
        assert_eq!(counters.failed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let executor: FetchExecutor = Arc::new(|job: &FetchJob, _token: &JobToken| {
            if job.kind.cell() == Some(CellCoord::new(0, 0)) {
                panic!("bad tile");
            }
            Some(JobOutput::Tile(Ok(TileImage::new(1, 1, vec![0; 4]))))
        });
        let (runner, _generation, rx, _counters) = runner_with(executor);
        let queue = Arc::new(FetchQueue::new());
        let pool = WorkerPool::new(Arc::clone(&queue), runner, &WorkerPoolConfig::new(1)).unwrap();

        queue.push(FetchPriority::Visible, 0, tile(0, 0, 1));
        queue.push(FetchPriority::Visible, 0, tile(0, 1, 2));

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(first.output.is_err());
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!second.output.is_err());

        pool.shutdown();
    }

    #[test]
    fn test_worker_pool_executes_jobs() {
        let (runner, _generation, rx, _counters) = runner_with(pixel_executor());
        let queue = Arc::new(FetchQueue::new());
        let pool = WorkerPool::new(Arc::clone(&queue), runner, &WorkerPoolConfig::new(2)).unwrap();
        assert_eq!(pool.num_workers(), 2);

        for col in 0..5 {
            queue.push(FetchPriority::Visible, 0, tile(0, col, u64::from(col)));
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut received = 0;
        while received < 5 && Instant::now() < deadline {
            if rx.recv_timeout(Duration::from_millis(100)).is_ok() {
                received += 1;
            }
        }
        assert_eq!(received, 5);

        pool.shutdown();
    }

    #[test]
    fn test_single_worker_follows_priority() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_clone = Arc::clone(&order);
        let executor: FetchExecutor = Arc::new(move |job: &FetchJob, _token: &JobToken| {
            order_clone.lock().unwrap().push(job.priority);
            Some(JobOutput::Tile(Ok(TileImage::new(1, 1, vec![0; 4]))))
        });
        let (runner, _generation, rx, _counters) = runner_with(executor);
        let queue = Arc::new(FetchQueue::new());

        // Queue before starting so the single worker sees all three at once
        queue.push(FetchPriority::Margin, 0, tile(0, 0, 1));
        queue.push(FetchPriority::Visible, 0, tile(0, 1, 2));
        queue.push(FetchPriority::Metadata, 0, FetchKind::Metadata { image_id: "img".into() });

        let pool = WorkerPool::new(Arc::clone(&queue), runner, &WorkerPoolConfig::new(1)).unwrap();
        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        pool.shutdown();

        assert_eq!(
            *order.lock().unwrap(),
            vec![FetchPriority::Metadata, FetchPriority::Visible, FetchPriority::Margin]
        );
    }

    #[test]
    fn test_drop_joins_idle_workers() {
        let (runner, _generation, _rx, _counters) = runner_with(pixel_executor());
        let queue = Arc::new(FetchQueue::new());
        let config = WorkerPoolConfig::new(3).with_poll_interval(Duration::from_secs(60));
        let pool = WorkerPool::new(queue, runner, &config).unwrap();
        assert!(!pool.is_shutting_down());

        // Idle workers wait on the queue; shutdown must wake them
        let started = Instant::now();
        drop(pool);
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn test_num_cpus() {
        let cpus = num_cpus();
        assert!(cpus > 0);
        assert!(cpus <= 1024);
    }
}
