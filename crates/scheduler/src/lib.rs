//! Mosaic Fetch Scheduler Library
//!
//! Decides which tiles a viewport needs and fetches them on a pool of worker
//! threads.
//!
//! Jobs are organized by priority (metadata, visible tiles, margin tiles)
//! and executed in priority order with FIFO ordering within each priority
//! level. Every job carries the generation it was issued under; advancing
//! the generation on a zoom change purges queued jobs and makes in-flight
//! results stale. Completions travel back to the grid owner over a channel.
//!
//! # Example
//!
//! ```
//! use mosaic_render::{Rect, ZoomLevel};
//! use mosaic_scheduler::{FetchPriority, VisibilityWindow};
//!
//! let level = ZoomLevel::new(0, 100.0, 256.0, 256.0, 4, 4);
//! let window = VisibilityWindow::new(&level, Rect::new(0.0, 0.0, 512.0, 512.0), 1);
//!
//! // Visible cells are fetched before the prefetch ring
//! let order = window.fetch_order();
//! assert_eq!(order.len(), 9);
//! assert!(order[..4].iter().all(|(_, p)| *p == FetchPriority::Visible));
//! ```

mod error;
mod generation;
mod priority;
mod scheduler;
mod viewport;
mod worker;

// Re-export public API
pub use error::TileFetchError;
pub use generation::{GenerationCounter, JobToken};
pub use priority::{FetchJob, FetchKind, FetchPriority, FetchQueue, JobId, MosaicKey};
pub use scheduler::{FetchScheduler, SchedulerStats};
pub use viewport::{cell_priority, evictable_cells, padded_rect, required_cells, VisibilityWindow};
pub use worker::{BoxError, FetchCompletion, FetchExecutor, JobOutput, WorkerPool, WorkerPoolConfig};
