//! Sparse tile grid for the selected zoom level
//!
//! Holds the load state of every cell of one zoom level. Cells that were
//! never requested (or were evicted) are simply absent from the map, so the
//! memory footprint follows the working set rather than the grid size.
//!
//! The grid is not thread-safe on purpose: it is owned by a single session
//! and fetch completions are applied to it from that owner only.

use mosaic_render::{CellCoord, TileImage, ZoomLevel};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identifies one issued fetch
///
/// A `Loading` cell remembers the ticket of the fetch it waits for; any
/// completion carrying a different ticket has been superseded.
pub type FetchTicket = u64;

/// Load state of one cell
#[derive(Debug, Clone)]
pub enum TileState {
    /// Not requested, or evicted
    Absent,

    /// A fetch is outstanding
    Loading {
        ticket: FetchTicket,
        /// Consecutive failures before this attempt
        failures: u32,
    },

    /// Decoded tile is available
    Loaded(Arc<TileImage>),

    /// The last fetch failed; retryable like `Absent`
    Failed {
        error: String,
        at: Instant,
        failures: u32,
    },
}

static ABSENT: TileState = TileState::Absent;

impl TileState {
    pub fn status(&self) -> TileStatus {
        match self {
            TileState::Absent => TileStatus::Absent,
            TileState::Loading { .. } => TileStatus::Loading,
            TileState::Loaded(_) => TileStatus::Loaded,
            TileState::Failed { .. } => TileStatus::Failed,
        }
    }
}

/// Payload-free view of [`TileState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileStatus {
    Absent,
    Loading,
    Loaded,
    Failed,
}

/// Result of applying a fetch completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The cell transitioned
    Applied,

    /// The cell was evicted or re-requested meanwhile; nothing changed
    StaleResultDiscarded,
}

/// Result of evicting a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictOutcome {
    /// A loaded image was dropped
    Dropped,

    /// An outstanding fetch was abandoned; its result will be discarded
    Abandoned,

    /// Absent or failed cell, nothing to do
    Noop,
}

/// Delay before a failed cell may be fetched again
///
/// A zero base delay retries on the very next visibility pass. Otherwise the
/// delay doubles with each consecutive failure up to `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Retry as soon as the cell is required again
    pub fn immediate() -> Self {
        Self { backoff: Duration::ZERO, max_backoff: Duration::ZERO }
    }

    pub fn exponential(backoff: Duration, max_backoff: Duration) -> Self {
        Self { backoff, max_backoff }
    }

    /// Delay after `failures` consecutive failures
    pub fn delay_for(&self, failures: u32) -> Duration {
        if self.backoff.is_zero() || failures == 0 {
            return Duration::ZERO;
        }
        let shift = (failures - 1).min(16);
        self.backoff.saturating_mul(1 << shift).min(self.max_backoff.max(self.backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate()
    }
}

/// Grid statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GridStats {
    /// Cells with a decoded image
    pub loaded: usize,

    /// Cells with an outstanding fetch
    pub loading: usize,

    /// Cells whose last fetch failed
    pub failed: usize,

    /// Bytes held by decoded images
    pub memory_used: usize,

    /// Soft memory budget (0 = unbounded)
    pub memory_budget: usize,

    /// Cells evicted since the grid was created
    pub evictions: u64,

    /// Completions ignored because the cell moved on
    pub stale_discards: u64,
}

impl GridStats {
    /// Fraction of the memory budget in use (0.0 when unbounded)
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_budget == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_budget as f64
        }
    }

    pub fn is_over_budget(&self) -> bool {
        self.memory_budget > 0 && self.memory_used > self.memory_budget
    }
}

/// Sparse mutable cache of tile states for one zoom level
///
/// # Example
///
/// ```
/// use mosaic_cache::{ApplyOutcome, RetryPolicy, TileGrid, TileStatus};
/// use mosaic_render::{CellCoord, TileImage, ZoomLevel};
/// use std::time::Instant;
///
/// let mut grid = TileGrid::new(ZoomLevel::new(0, 100.0, 256.0, 256.0, 4, 4), 1);
/// let cell = CellCoord::new(0, 1);
///
/// assert!(grid.begin_loading(cell, 7, Instant::now(), &RetryPolicy::immediate()));
/// let image = TileImage::new(1, 1, vec![0; 4]);
/// assert_eq!(grid.complete(cell, 7, image), ApplyOutcome::Applied);
/// assert_eq!(grid.status(cell), TileStatus::Loaded);
/// ```
#[derive(Debug)]
pub struct TileGrid {
    zoom_level: ZoomLevel,
    generation: u64,
    cells: HashMap<CellCoord, TileState>,
    memory_used: usize,
    memory_budget: usize,
    evictions: u64,
    stale_discards: u64,
}

impl TileGrid {
    /// Create an empty grid for `zoom_level`, tagged with `generation`
    pub fn new(zoom_level: ZoomLevel, generation: u64) -> Self {
        Self {
            zoom_level,
            generation,
            cells: HashMap::new(),
            memory_used: 0,
            memory_budget: 0,
            evictions: 0,
            stale_discards: 0,
        }
    }

    /// Set the soft memory budget reported by [`TileGrid::stats`]
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    pub fn zoom_level(&self) -> &ZoomLevel {
        &self.zoom_level
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self, cell: CellCoord) -> &TileState {
        self.cells.get(&cell).unwrap_or(&ABSENT)
    }

    pub fn status(&self, cell: CellCoord) -> TileStatus {
        self.state(cell).status()
    }

    pub fn is_loading(&self, cell: CellCoord) -> bool {
        matches!(self.state(cell), TileState::Loading { .. })
    }

    /// Decoded image of `cell`, if loaded
    pub fn tile_at(&self, cell: CellCoord) -> Option<Arc<TileImage>> {
        match self.cells.get(&cell) {
            Some(TileState::Loaded(image)) => Some(Arc::clone(image)),
            _ => None,
        }
    }

    /// Whether a fetch may be issued for `cell` now
    ///
    /// Absent cells always qualify. Failed cells qualify once the retry
    /// policy's delay has elapsed.
    pub fn is_retryable(&self, cell: CellCoord, now: Instant, policy: &RetryPolicy) -> bool {
        match self.state(cell) {
            TileState::Absent => true,
            TileState::Failed { at, failures, .. } => {
                now.saturating_duration_since(*at) >= policy.delay_for(*failures)
            }
            TileState::Loading { .. } | TileState::Loaded(_) => false,
        }
    }

    /// Mark `cell` as loading under `ticket`
    ///
    /// Returns `false` (and changes nothing) if the cell is already loading,
    /// loaded, or failed too recently.
    pub fn begin_loading(
        &mut self,
        cell: CellCoord,
        ticket: FetchTicket,
        now: Instant,
        policy: &RetryPolicy,
    ) -> bool {
        if !self.zoom_level.contains(cell) || !self.is_retryable(cell, now, policy) {
            return false;
        }

        let failures = match self.state(cell) {
            TileState::Failed { failures, .. } => *failures,
            _ => 0,
        };
        self.cells.insert(cell, TileState::Loading { ticket, failures });
        true
    }

    /// Apply a successful fetch
    pub fn complete(
        &mut self,
        cell: CellCoord,
        ticket: FetchTicket,
        image: TileImage,
    ) -> ApplyOutcome {
        if !self.is_waiting_for(cell, ticket) {
            self.stale_discards += 1;
            return ApplyOutcome::StaleResultDiscarded;
        }

        self.memory_used += image.byte_size();
        self.cells.insert(cell, TileState::Loaded(Arc::new(image)));
        ApplyOutcome::Applied
    }

    /// Apply a failed fetch
    pub fn fail(
        &mut self,
        cell: CellCoord,
        ticket: FetchTicket,
        error: String,
        now: Instant,
    ) -> ApplyOutcome {
        let failures = match self.cells.get(&cell) {
            Some(TileState::Loading { ticket: current, failures }) if *current == ticket => {
                *failures
            }
            _ => {
                self.stale_discards += 1;
                return ApplyOutcome::StaleResultDiscarded;
            }
        };

        self.cells.insert(cell, TileState::Failed { error, at: now, failures: failures + 1 });
        ApplyOutcome::Applied
    }

    /// Count a completion discarded before reaching the grid
    pub fn record_stale_discard(&mut self) {
        self.stale_discards += 1;
    }

    /// Evict `cell`
    ///
    /// A loaded image is dropped. An outstanding fetch is abandoned: the cell
    /// becomes absent and the fetch's ticket no longer matches anything.
    pub fn evict(&mut self, cell: CellCoord) -> EvictOutcome {
        match self.cells.get(&cell) {
            Some(TileState::Loaded(_)) => {
                if let Some(TileState::Loaded(image)) = self.cells.remove(&cell) {
                    self.memory_used = self.memory_used.saturating_sub(image.byte_size());
                }
                self.evictions += 1;
                EvictOutcome::Dropped
            }
            Some(TileState::Loading { .. }) => {
                self.cells.remove(&cell);
                self.evictions += 1;
                EvictOutcome::Abandoned
            }
            Some(TileState::Absent) | Some(TileState::Failed { .. }) | None => EvictOutcome::Noop,
        }
    }

    /// Loaded and loading cells, in row-major order
    pub fn occupied_cells(&self) -> Vec<CellCoord> {
        self.cells_where(|state| matches!(state, TileState::Loaded(_) | TileState::Loading { .. }))
    }

    /// Loaded cells, in row-major order
    pub fn loaded_cells(&self) -> Vec<CellCoord> {
        self.cells_where(|state| matches!(state, TileState::Loaded(_)))
    }

    /// Cells with an outstanding fetch, in row-major order
    pub fn loading_cells(&self) -> Vec<CellCoord> {
        self.cells_where(|state| matches!(state, TileState::Loading { .. }))
    }

    pub fn failed_cells(&self) -> Vec<CellCoord> {
        self.cells_where(|state| matches!(state, TileState::Failed { .. }))
    }

    pub fn has_pending(&self) -> bool {
        self.cells.values().any(|state| matches!(state, TileState::Loading { .. }))
    }

    pub fn memory_used(&self) -> usize {
        self.memory_used
    }

    pub fn stats(&self) -> GridStats {
        let mut stats = GridStats {
            memory_used: self.memory_used,
            memory_budget: self.memory_budget,
            evictions: self.evictions,
            stale_discards: self.stale_discards,
            ..GridStats::default()
        };

        for state in self.cells.values() {
            match state {
                TileState::Loaded(_) => stats.loaded += 1,
                TileState::Loading { .. } => stats.loading += 1,
                TileState::Failed { .. } => stats.failed += 1,
                TileState::Absent => {}
            }
        }

        stats
    }

    fn is_waiting_for(&self, cell: CellCoord, ticket: FetchTicket) -> bool {
        matches!(self.cells.get(&cell), Some(TileState::Loading { ticket: current, .. }) if *current == ticket)
    }

    fn cells_where(&self, predicate: impl Fn(&TileState) -> bool) -> Vec<CellCoord> {
        let mut cells: Vec<CellCoord> = self
            .cells
            .iter()
            .filter(|(_, state)| predicate(state))
            .map(|(cell, _)| *cell)
            .collect();
        cells.sort();
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> TileGrid {
        TileGrid::new(ZoomLevel::new(0, 100.0, 256.0, 256.0, 4, 4), 3)
    }

    fn image(bytes: usize) -> TileImage {
        TileImage::new(1, 1, vec![0; bytes])
    }

    fn immediate() -> RetryPolicy {
        RetryPolicy::immediate()
    }

    #[test]
    fn test_new_grid_is_empty() {
        let grid = grid();
        assert_eq!(grid.generation(), 3);
        assert_eq!(grid.status(CellCoord::new(1, 1)), TileStatus::Absent);
        assert!(grid.tile_at(CellCoord::new(1, 1)).is_none());
        assert_eq!(grid.stats(), GridStats::default());
    }

    #[test]
    fn test_begin_loading_only_once() {
        let mut grid = grid();
        let cell = CellCoord::new(0, 0);
        let now = Instant::now();

        assert!(grid.begin_loading(cell, 1, now, &immediate()));
        assert!(!grid.begin_loading(cell, 2, now, &immediate()));
        assert_eq!(grid.status(cell), TileStatus::Loading);
        assert!(grid.has_pending());
    }

    #[test]
    fn test_begin_loading_rejects_out_of_range() {
        let mut grid = grid();
        assert!(!grid.begin_loading(CellCoord::new(4, 0), 1, Instant::now(), &immediate()));
        assert!(grid.occupied_cells().is_empty());
    }

    #[test]
    fn test_complete_with_matching_ticket() {
        let mut grid = grid();
        let cell = CellCoord::new(1, 2);
        grid.begin_loading(cell, 9, Instant::now(), &immediate());

        assert_eq!(grid.complete(cell, 9, image(64)), ApplyOutcome::Applied);
        assert_eq!(grid.status(cell), TileStatus::Loaded);
        assert_eq!(grid.tile_at(cell).unwrap().byte_size(), 64);
        assert_eq!(grid.memory_used(), 64);

        // A duplicate completion cannot overwrite the loaded tile
        assert_eq!(grid.complete(cell, 9, image(64)), ApplyOutcome::StaleResultDiscarded);
        assert_eq!(grid.memory_used(), 64);
    }

    #[test]
    fn test_completion_after_eviction_is_discarded() {
        let mut grid = grid();
        let cell = CellCoord::new(2, 2);
        grid.begin_loading(cell, 5, Instant::now(), &immediate());

        assert_eq!(grid.evict(cell), EvictOutcome::Abandoned);
        assert_eq!(grid.status(cell), TileStatus::Absent);

        assert_eq!(grid.complete(cell, 5, image(16)), ApplyOutcome::StaleResultDiscarded);
        assert_eq!(grid.status(cell), TileStatus::Absent);
        assert_eq!(grid.stats().stale_discards, 1);
    }

    #[test]
    fn test_superseded_ticket_is_discarded() {
        let mut grid = grid();
        let cell = CellCoord::new(0, 3);
        let now = Instant::now();

        grid.begin_loading(cell, 1, now, &immediate());
        grid.evict(cell);
        grid.begin_loading(cell, 2, now, &immediate());

        assert_eq!(grid.complete(cell, 1, image(4)), ApplyOutcome::StaleResultDiscarded);
        assert_eq!(grid.status(cell), TileStatus::Loading);
        assert_eq!(grid.complete(cell, 2, image(4)), ApplyOutcome::Applied);
    }

    #[test]
    fn test_failure_is_retryable() {
        let mut grid = grid();
        let cell = CellCoord::new(3, 3);
        let now = Instant::now();

        grid.begin_loading(cell, 1, now, &immediate());
        assert_eq!(grid.fail(cell, 1, "boom".into(), now), ApplyOutcome::Applied);
        assert_eq!(grid.status(cell), TileStatus::Failed);
        assert!(grid.tile_at(cell).is_none());

        assert!(grid.is_retryable(cell, now, &immediate()));
        assert!(grid.begin_loading(cell, 2, now, &immediate()));

        grid.fail(cell, 2, "boom".into(), now);
        match grid.state(cell) {
            TileState::Failed { failures, error, .. } => {
                assert_eq!(*failures, 2);
                assert_eq!(error, "boom");
            }
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn test_backoff_delays_retry() {
        let mut grid = grid();
        let cell = CellCoord::new(0, 0);
        let policy = RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(4));
        let start = Instant::now();

        grid.begin_loading(cell, 1, start, &policy);
        grid.fail(cell, 1, "timeout".into(), start);

        assert!(!grid.begin_loading(cell, 2, start, &policy));
        assert!(!grid.is_retryable(cell, start + Duration::from_millis(999), &policy));
        assert!(grid.begin_loading(cell, 2, start + Duration::from_secs(1), &policy));
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy::exponential(Duration::from_millis(500), Duration::from_secs(3));
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(policy.delay_for(40), Duration::from_secs(3));
        assert_eq!(RetryPolicy::immediate().delay_for(10), Duration::ZERO);
    }

    #[test]
    fn test_evict_loaded_frees_memory() {
        let mut grid = grid();
        let cell = CellCoord::new(1, 1);
        grid.begin_loading(cell, 1, Instant::now(), &immediate());
        grid.complete(cell, 1, image(100));

        assert_eq!(grid.evict(cell), EvictOutcome::Dropped);
        assert_eq!(grid.memory_used(), 0);
        assert_eq!(grid.evict(cell), EvictOutcome::Noop);
        assert_eq!(grid.stats().evictions, 1);
    }

    #[test]
    fn test_evict_failed_is_noop() {
        let mut grid = grid();
        let cell = CellCoord::new(1, 0);
        let now = Instant::now();
        grid.begin_loading(cell, 1, now, &immediate());
        grid.fail(cell, 1, "nope".into(), now);

        assert_eq!(grid.evict(cell), EvictOutcome::Noop);
        assert_eq!(grid.status(cell), TileStatus::Failed);
    }

    #[test]
    fn test_occupied_cells_sorted() {
        let mut grid = grid();
        let now = Instant::now();
        grid.begin_loading(CellCoord::new(2, 0), 1, now, &immediate());
        grid.begin_loading(CellCoord::new(0, 3), 2, now, &immediate());
        grid.begin_loading(CellCoord::new(0, 1), 3, now, &immediate());
        grid.complete(CellCoord::new(0, 3), 2, image(8));

        assert_eq!(
            grid.occupied_cells(),
            vec![CellCoord::new(0, 1), CellCoord::new(0, 3), CellCoord::new(2, 0)]
        );
        assert_eq!(grid.loaded_cells(), vec![CellCoord::new(0, 3)]);
        assert_eq!(grid.loading_cells(), vec![CellCoord::new(0, 1), CellCoord::new(2, 0)]);
    }

    #[test]
    fn test_stats_and_budget() {
        let mut grid = grid().with_memory_budget(100);
        let now = Instant::now();
        for (ticket, col) in (1..=3).zip(0..3) {
            grid.begin_loading(CellCoord::new(0, col), ticket, now, &immediate());
        }
        grid.complete(CellCoord::new(0, 0), 1, image(60));
        grid.complete(CellCoord::new(0, 1), 2, image(60));

        let stats = grid.stats();
        assert_eq!((stats.loaded, stats.loading, stats.failed), (2, 1, 0));
        assert_eq!(stats.memory_used, 120);
        assert!(stats.is_over_budget());
        assert!((stats.memory_utilization() - 1.2).abs() < f64::EPSILON);
    }
}
