//! Mosaic session controller
//!
//! A [`MosaicSession`] owns the tile grid of one mosaic and is the only
//! place where tile state changes. Viewport reports turn into fetch jobs on
//! the scheduler; finished fetches come back over the completion channel
//! and are applied by [`MosaicSession::pump`] on the caller's thread.
//!
//! Lifecycle:
//!
//! ```text
//! Uninitialized --load_mosaic--> MetadataLoading --metadata ok--> Ready(zoom)
//!       ^                              |                              |
//!       +-------- metadata error ------+                              |
//!                                      ^------- load_mosaic ----------+
//! ```
//!
//! Every `load_mosaic` and every zoom switch starts a new generation. Work
//! issued under an older generation is dropped from the queue, and results
//! that still arrive are discarded without touching the grid.

use crate::error::{MosaicError, MosaicResult};
use crate::events::{SessionEvent, TileChangeStatus};
use crate::source::{MosaicSource, TileRequest};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, trace, warn};
use mosaic_cache::{ApplyOutcome, EvictOutcome, GridStats, RetryPolicy, TileGrid, TileStatus, ViewerConfig};
use mosaic_render::{
    frame_for, CellCoord, ImageDecoder, MosaicMetadata, Rect, Size, TileDecoder, TileImage,
    ZoomLevel,
};
use mosaic_scheduler::{
    BoxError, FetchCompletion, FetchExecutor, FetchJob, FetchKind, FetchScheduler, JobOutput,
    JobToken, MosaicKey, TileFetchError, VisibilityWindow,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Events buffered per subscriber before new ones are dropped
pub const EVENT_BUFFER: usize = 1024;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No mosaic loaded
    Uninitialized,

    /// Waiting for the metadata of the mosaic being loaded
    MetadataLoading,

    /// Metadata loaded; tiles of `zoom_index` can be requested
    Ready { zoom_index: u32 },
}

/// What a viewport report changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewportUpdate {
    /// Fetches issued
    pub requested: usize,

    /// Cells released
    pub evicted: usize,
}

/// Tile-window cache and loader for one mosaic at a time
///
/// # Example
///
/// ```
/// use mosaic_cache::{TileStatus, ViewerConfig};
/// use mosaic_core::{MemorySource, MosaicSession};
/// use mosaic_render::{CellCoord, MosaicMetadata, RawRgbaDecoder, Rect, ZoomLevel};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let source = Arc::new(MemorySource::new());
/// let level = ZoomLevel::new(0, 100.0, 2.0, 2.0, 2, 2);
/// source.insert_metadata(MosaicMetadata::new("img", 4.0, 4.0, vec![level]).unwrap());
/// for row in 0..2 {
///     for col in 0..2 {
///         source.insert_tile("img", 0, CellCoord::new(row, col), vec![255; 16]);
///     }
/// }
///
/// let decoder = Arc::new(RawRgbaDecoder::new(2, 2));
/// let config = ViewerConfig::default().with_fetch_workers(2);
/// let mut session = MosaicSession::new(source, decoder, config).unwrap();
///
/// session.load_mosaic_blocking("img", Duration::from_secs(5)).unwrap();
/// session.pan_ended(Rect::new(0.0, 0.0, 4.0, 4.0)).unwrap();
/// session.wait_idle(Duration::from_secs(5)).unwrap();
///
/// assert_eq!(session.tile_state(1, 1), TileStatus::Loaded);
/// ```
pub struct MosaicSession {
    config: ViewerConfig,
    retry_policy: RetryPolicy,
    scheduler: FetchScheduler,
    state: SessionState,
    loading_image: Option<String>,
    metadata: Option<MosaicMetadata>,
    mosaic: Option<MosaicKey>,
    grid: Option<TileGrid>,
    subscribers: Vec<Sender<SessionEvent>>,
}

impl MosaicSession {
    /// Create a session and start its fetch workers
    ///
    /// `config.fetch_workers == 0` starts no threads; jobs then run on the
    /// calling thread inside [`MosaicSession::pump_blocking`] and
    /// [`MosaicSession::wait_idle`], or step by step through
    /// [`MosaicSession::scheduler`].
    pub fn new(
        source: Arc<dyn MosaicSource>,
        decoder: Arc<dyn TileDecoder>,
        config: ViewerConfig,
    ) -> MosaicResult<Self> {
        let scheduler = FetchScheduler::new(
            fetch_executor(source, decoder),
            config.fetch_workers,
            config.poll_interval,
        )?;

        Ok(Self {
            retry_policy: config.retry_policy(),
            config,
            scheduler,
            state: SessionState::Uninitialized,
            loading_image: None,
            metadata: None,
            mosaic: None,
            grid: None,
            subscribers: Vec::new(),
        })
    }

    /// Session decoding tiles with [`ImageDecoder`]
    pub fn with_source(source: Arc<dyn MosaicSource>, config: ViewerConfig) -> MosaicResult<Self> {
        Self::new(source, Arc::new(ImageDecoder), config)
    }

    /// Start loading `image_id`
    ///
    /// Any previous mosaic is dropped immediately. The metadata is fetched
    /// on the worker pool; the session becomes ready when
    /// [`MosaicSession::pump`] applies the result.
    pub fn load_mosaic(&mut self, image_id: &str) -> MosaicResult<()> {
        if self.state == SessionState::MetadataLoading {
            return Err(MosaicError::InvalidState {
                operation: "load a mosaic",
                state: self.state,
            });
        }

        let generation = self.scheduler.advance_generation();
        self.grid = None;
        self.metadata = None;
        self.mosaic = None;
        self.loading_image = Some(image_id.to_string());
        self.state = SessionState::MetadataLoading;
        self.scheduler.submit_metadata(image_id);

        info!("loading mosaic '{}' (generation {})", image_id, generation);
        Ok(())
    }

    /// Load `image_id` and wait until it is ready or has failed
    pub fn load_mosaic_blocking(&mut self, image_id: &str, timeout: Duration) -> MosaicResult<()> {
        self.load_mosaic(image_id)?;

        let deadline = Instant::now() + timeout;
        while self.state == SessionState::MetadataLoading {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(MosaicError::Timeout(timeout));
            }
            self.pump_blocking(remaining)?;
        }
        Ok(())
    }

    /// Switch to another zoom level of the loaded mosaic
    ///
    /// The current grid is discarded and replaced by an empty one; report
    /// the viewport again to populate it.
    pub fn select_zoom_level(&mut self, index: u32) -> MosaicResult<()> {
        let SessionState::Ready { zoom_index } = self.state else {
            return Err(MosaicError::InvalidState {
                operation: "select a zoom level",
                state: self.state,
            });
        };
        if zoom_index == index {
            return Ok(());
        }

        let level = self
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.zoom_level(index))
            .cloned()
            .ok_or(MosaicError::UnknownZoomLevel(index))?;

        let generation = self.scheduler.advance_generation();
        debug!("zoom level {} -> {} (generation {})", zoom_index, index, generation);
        self.install_grid(level, generation);
        self.emit(SessionEvent::ZoomLevelChanged { generation, zoom_index: index });
        Ok(())
    }

    /// Request every cell the viewport needs, visible cells first
    ///
    /// Never evicts. Does nothing until the session is ready.
    pub fn report_viewport(&mut self, visible: Rect) -> MosaicResult<ViewportUpdate> {
        Ok(ViewportUpdate { requested: self.load_required(visible), evicted: 0 })
    }

    /// Viewport settled after a pan: release cells outside the window and
    /// request the ones inside it
    pub fn pan_ended(&mut self, visible: Rect) -> MosaicResult<ViewportUpdate> {
        let evicted = self.evict_outside(visible);
        let requested = self.load_required(visible);
        Ok(ViewportUpdate { requested, evicted })
    }

    /// Apply every completion that has arrived
    ///
    /// Returns the number of applied transitions. A metadata failure is
    /// returned as [`MosaicError::MetadataLoad`]; completions behind it stay
    /// queued for the next call.
    pub fn pump(&mut self) -> MosaicResult<usize> {
        let mut applied = 0;
        while let Some(completion) = self.scheduler.try_recv() {
            applied += self.apply(completion)?;
        }
        Ok(applied)
    }

    /// Wait up to `timeout` for a completion, then drain the rest
    pub fn pump_blocking(&mut self, timeout: Duration) -> MosaicResult<usize> {
        if self.scheduler.is_manual() {
            self.scheduler.run_queued();
            return self.pump();
        }

        match self.scheduler.recv_timeout(timeout) {
            Some(completion) => {
                let applied = self.apply(completion)?;
                Ok(applied + self.pump()?)
            }
            None => Ok(0),
        }
    }

    /// Pump until no metadata load or tile fetch is outstanding
    pub fn wait_idle(&mut self, timeout: Duration) -> MosaicResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump()?;
            if !self.is_busy() {
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(MosaicError::Timeout(timeout));
            }
            self.pump_blocking(remaining.min(self.config.poll_interval))?;
        }
    }

    /// Subscribe to change notifications
    ///
    /// Each subscriber buffers up to [`EVENT_BUFFER`] events; while its
    /// buffer is full, new events for it are dropped. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (sender, receiver) = bounded(EVENT_BUFFER);
        self.subscribers.push(sender);
        receiver
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Id of the loaded mosaic, or of the one being loaded
    pub fn image_id(&self) -> Option<&str> {
        self.mosaic
            .as_ref()
            .map(|mosaic| mosaic.image_id.as_str())
            .or(self.loading_image.as_deref())
    }

    pub fn metadata(&self) -> Option<&MosaicMetadata> {
        self.metadata.as_ref()
    }

    pub fn current_zoom_level(&self) -> Option<&ZoomLevel> {
        self.grid.as_ref().map(TileGrid::zoom_level)
    }

    pub fn available_zoom_levels(&self) -> &[ZoomLevel] {
        match &self.metadata {
            Some(metadata) => metadata.zoom_levels(),
            None => &[],
        }
    }

    pub fn tile_at(&self, row: u32, col: u32) -> Option<Arc<TileImage>> {
        self.grid.as_ref()?.tile_at(CellCoord::new(row, col))
    }

    pub fn tile_state(&self, row: u32, col: u32) -> TileStatus {
        self.grid
            .as_ref()
            .map_or(TileStatus::Absent, |grid| grid.status(CellCoord::new(row, col)))
    }

    /// Frame of a cell in canvas coordinates at the current zoom level
    pub fn frame_for_cell(&self, row: u32, col: u32) -> Option<Rect> {
        let level = self.current_zoom_level()?;
        let cell = CellCoord::new(row, col);
        level.contains(cell).then(|| frame_for(level, cell))
    }

    pub fn canvas_size(&self) -> Option<Size> {
        self.current_zoom_level().map(ZoomLevel::canvas_size)
    }

    pub fn grid(&self) -> Option<&TileGrid> {
        self.grid.as_ref()
    }

    pub fn grid_stats(&self) -> Option<GridStats> {
        self.grid.as_ref().map(TileGrid::stats)
    }

    pub fn generation(&self) -> u64 {
        self.scheduler.generation()
    }

    pub fn scheduler(&self) -> &FetchScheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    fn is_busy(&self) -> bool {
        self.state == SessionState::MetadataLoading
            || self.grid.as_ref().is_some_and(TileGrid::has_pending)
    }

    fn install_grid(&mut self, level: ZoomLevel, generation: u64) {
        self.state = SessionState::Ready { zoom_index: level.index };
        self.grid = Some(TileGrid::new(level, generation).with_memory_budget(self.config.memory_budget));
    }

    fn load_required(&mut self, visible: Rect) -> usize {
        let (Some(grid), Some(mosaic)) = (self.grid.as_mut(), self.mosaic.as_ref()) else {
            trace!("viewport reported before the mosaic is ready");
            return 0;
        };

        let order =
            VisibilityWindow::new(grid.zoom_level(), visible, self.config.buffer_tiles).fetch_order();
        let now = Instant::now();
        let mut issued = Vec::new();
        for (cell, priority) in order {
            if self
                .scheduler
                .ensure_loaded(grid, mosaic, cell, priority, &self.retry_policy, now)
                .is_some()
            {
                issued.push(cell);
            }
        }

        let generation = grid.generation();
        if !issued.is_empty() {
            debug!("requested {} tile(s) for viewport {:?}", issued.len(), visible);
        }
        for &cell in &issued {
            self.emit(SessionEvent::TileChanged {
                generation,
                cell,
                status: TileChangeStatus::Loading,
            });
        }
        issued.len()
    }

    fn evict_outside(&mut self, visible: Rect) -> usize {
        let Some(grid) = self.grid.as_mut() else {
            return 0;
        };

        let evictable = VisibilityWindow::new(grid.zoom_level(), visible, self.config.buffer_tiles)
            .evictable_cells(grid.occupied_cells());
        let generation = grid.generation();
        let mut evicted = Vec::new();
        for cell in evictable {
            if self.scheduler.evict(grid, cell) != EvictOutcome::Noop {
                evicted.push(cell);
            }
        }

        if !evicted.is_empty() {
            debug!("evicted {} tile(s) outside viewport {:?}", evicted.len(), visible);
        }
        for &cell in &evicted {
            self.emit(SessionEvent::TileChanged {
                generation,
                cell,
                status: TileChangeStatus::Evicted,
            });
        }
        evicted.len()
    }

    fn apply(&mut self, completion: FetchCompletion) -> MosaicResult<usize> {
        let FetchCompletion { generation, kind, output, .. } = completion;
        match output {
            JobOutput::Metadata(result) => self.apply_metadata(generation, kind, result),
            JobOutput::Tile(result) => Ok(usize::from(self.apply_tile(generation, kind, result))),
        }
    }

    fn apply_metadata(
        &mut self,
        generation: u64,
        kind: FetchKind,
        result: Result<MosaicMetadata, BoxError>,
    ) -> MosaicResult<usize> {
        let FetchKind::Metadata { image_id } = kind else {
            return Ok(0);
        };
        if self.state != SessionState::MetadataLoading || generation != self.scheduler.generation()
        {
            trace!("discarding stale metadata for '{}' (generation {})", image_id, generation);
            return Ok(0);
        }

        match result {
            Ok(metadata) => {
                let level = self.initial_zoom_level(&metadata).clone();
                info!(
                    "mosaic '{}' ready: {} zoom level(s), starting at level {}",
                    image_id,
                    metadata.zoom_levels().len(),
                    level.index
                );

                self.mosaic = Some(MosaicKey::new(image_id.clone(), metadata.extension.clone()));
                self.metadata = Some(metadata);
                self.loading_image = None;
                let zoom_index = level.index;
                self.install_grid(level, generation);
                self.emit(SessionEvent::MetadataLoaded { image_id, zoom_index });
                Ok(1)
            }
            Err(source) => {
                error!("failed to load metadata for '{}': {}", image_id, source);
                self.state = SessionState::Uninitialized;
                self.loading_image = None;
                self.emit(SessionEvent::MetadataFailed {
                    image_id: image_id.clone(),
                    error: source.to_string(),
                });
                Err(MosaicError::MetadataLoad { image_id, source })
            }
        }
    }

    fn initial_zoom_level<'m>(&self, metadata: &'m MosaicMetadata) -> &'m ZoomLevel {
        match self.config.default_zoom_index {
            Some(index) => metadata.zoom_level(index).unwrap_or_else(|| {
                warn!("configured zoom level {} not in metadata, using the first level", index);
                metadata.default_zoom_level()
            }),
            None => metadata.default_zoom_level(),
        }
    }

    fn apply_tile(
        &mut self,
        generation: u64,
        kind: FetchKind,
        result: Result<TileImage, TileFetchError>,
    ) -> bool {
        let FetchKind::Tile { cell, ticket, zoom_index, .. } = kind else {
            return false;
        };
        let Some(grid) = self.grid.as_mut() else {
            trace!("discarding tile {} at zoom {}: no grid", cell, zoom_index);
            return false;
        };
        if generation != grid.generation() {
            grid.record_stale_discard();
            trace!("discarding tile {} from generation {}", cell, generation);
            return false;
        }

        let (outcome, status) = match result {
            Ok(image) => (grid.complete(cell, ticket, image), TileChangeStatus::Loaded),
            Err(e) => {
                let outcome = grid.fail(cell, ticket, e.to_string(), Instant::now());
                if outcome == ApplyOutcome::Applied {
                    warn!("tile {} at zoom {} failed: {}", cell, zoom_index, e);
                }
                (outcome, TileChangeStatus::Failed)
            }
        };

        if outcome == ApplyOutcome::StaleResultDiscarded {
            trace!("discarding superseded result for tile {} (ticket {})", cell, ticket);
            return false;
        }

        self.emit(SessionEvent::TileChanged { generation, cell, status });
        true
    }

    fn emit(&mut self, event: SessionEvent) {
        self.subscribers.retain(|subscriber| match subscriber.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                trace!("subscriber buffer full, dropping {:?}", dropped);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

/// Executor run by the fetch workers: fetch, check staleness, decode
fn fetch_executor(source: Arc<dyn MosaicSource>, decoder: Arc<dyn TileDecoder>) -> FetchExecutor {
    Arc::new(move |job: &FetchJob, token: &JobToken| match &job.kind {
        FetchKind::Metadata { image_id } => {
            Some(JobOutput::Metadata(source.fetch_metadata(image_id).map_err(BoxError::from)))
        }
        FetchKind::Tile { mosaic, zoom_index, cell, .. } => {
            let request =
                TileRequest::new(mosaic.image_id.clone(), *zoom_index, *cell, mosaic.extension.clone());
            let bytes = match source.fetch_tile(&request) {
                Ok(bytes) => bytes,
                Err(e) => return Some(JobOutput::Tile(Err(TileFetchError::Fetch(Box::new(e))))),
            };
            if token.is_stale() {
                return None;
            }
            Some(JobOutput::Tile(decoder.decode(&bytes).map_err(TileFetchError::from)))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use mosaic_render::RawRgbaDecoder;

    fn manual_session(source: Arc<MemorySource>) -> MosaicSession {
        let config = ViewerConfig::default().with_fetch_workers(0);
        MosaicSession::new(source, Arc::new(RawRgbaDecoder::new(1, 1)), config).unwrap()
    }

    fn source_with_levels() -> Arc<MemorySource> {
        let source = Arc::new(MemorySource::new());
        let levels = vec![
            ZoomLevel::new(0, 25.0, 256.0, 256.0, 1, 1),
            ZoomLevel::new(1, 100.0, 256.0, 256.0, 4, 4),
        ];
        source.insert_metadata(MosaicMetadata::new("img", 1024.0, 1024.0, levels).unwrap());
        source
    }

    #[test]
    fn test_starts_uninitialized() {
        let session = manual_session(Arc::new(MemorySource::new()));
        assert_eq!(session.state(), SessionState::Uninitialized);
        assert!(session.current_zoom_level().is_none());
        assert!(session.available_zoom_levels().is_empty());
        assert!(session.frame_for_cell(0, 0).is_none());
        assert_eq!(session.tile_state(0, 0), TileStatus::Absent);
    }

    #[test]
    fn test_select_zoom_requires_ready() {
        let mut session = manual_session(Arc::new(MemorySource::new()));
        assert!(matches!(
            session.select_zoom_level(0),
            Err(MosaicError::InvalidState { state: SessionState::Uninitialized, .. })
        ));
    }

    #[test]
    fn test_load_while_loading_is_rejected() {
        let mut session = manual_session(source_with_levels());
        session.load_mosaic("img").unwrap();
        assert_eq!(session.state(), SessionState::MetadataLoading);
        assert_eq!(session.image_id(), Some("img"));
        assert!(matches!(session.load_mosaic("img"), Err(MosaicError::InvalidState { .. })));
    }

    #[test]
    fn test_manual_load_becomes_ready() {
        let mut session = manual_session(source_with_levels());
        let events = session.subscribe();
        session.load_mosaic_blocking("img", Duration::from_secs(1)).unwrap();

        assert_eq!(session.state(), SessionState::Ready { zoom_index: 0 });
        assert_eq!(session.available_zoom_levels().len(), 2);
        assert_eq!(session.canvas_size(), Some(Size::new(256.0, 256.0)));
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::MetadataLoaded { image_id: "img".into(), zoom_index: 0 }
        );
    }

    #[test]
    fn test_configured_default_zoom() {
        let config = ViewerConfig::default().with_fetch_workers(0).with_default_zoom_index(1);
        let mut session =
            MosaicSession::new(source_with_levels(), Arc::new(RawRgbaDecoder::new(1, 1)), config)
                .unwrap();
        session.load_mosaic_blocking("img", Duration::from_secs(1)).unwrap();
        assert_eq!(session.state(), SessionState::Ready { zoom_index: 1 });
    }

    #[test]
    fn test_unknown_configured_zoom_falls_back() {
        let config = ViewerConfig::default().with_fetch_workers(0).with_default_zoom_index(9);
        let mut session =
            MosaicSession::new(source_with_levels(), Arc::new(RawRgbaDecoder::new(1, 1)), config)
                .unwrap();
        session.load_mosaic_blocking("img", Duration::from_secs(1)).unwrap();
        assert_eq!(session.state(), SessionState::Ready { zoom_index: 0 });
    }

    #[test]
    fn test_select_zoom_level() {
        let mut session = manual_session(source_with_levels());
        session.load_mosaic_blocking("img", Duration::from_secs(1)).unwrap();
        let before = session.generation();

        session.select_zoom_level(0).unwrap();
        assert_eq!(session.generation(), before);

        assert!(matches!(session.select_zoom_level(7), Err(MosaicError::UnknownZoomLevel(7))));
        assert_eq!(session.generation(), before);

        session.select_zoom_level(1).unwrap();
        assert_eq!(session.generation(), before + 1);
        assert_eq!(session.current_zoom_level().unwrap().rows, 4);
        assert_eq!(session.frame_for_cell(3, 3), Some(Rect::new(768.0, 768.0, 256.0, 256.0)));
        assert!(session.frame_for_cell(4, 0).is_none());
    }

    #[test]
    fn test_viewport_before_ready_is_ignored() {
        let mut session = manual_session(source_with_levels());
        let update = session.report_viewport(Rect::new(0.0, 0.0, 100.0, 100.0)).unwrap();
        assert_eq!(update, ViewportUpdate::default());
        assert_eq!(session.scheduler().pending_jobs(), 0);
    }

    #[test]
    fn test_undrained_subscriber_is_capped() {
        let source = source_with_levels();
        for row in 0..4 {
            for col in 0..4 {
                source.insert_tile("img", 1, CellCoord::new(row, col), vec![0; 4]);
            }
        }
        let mut session = manual_session(source);
        let idle = session.subscribe();
        session.load_mosaic_blocking("img", Duration::from_secs(1)).unwrap();
        session.select_zoom_level(1).unwrap();

        // Every round evicts and reloads the whole grid: 48 events
        let everywhere = Rect::new(0.0, 0.0, 1024.0, 1024.0);
        let nowhere = Rect::new(10_000.0, 10_000.0, 1.0, 1.0);
        for _ in 0..30 {
            session.pan_ended(everywhere).unwrap();
            session.wait_idle(Duration::from_secs(1)).unwrap();
            session.pan_ended(nowhere).unwrap();
        }

        assert_eq!(idle.len(), EVENT_BUFFER);
        assert_eq!(session.subscribers.len(), 1);

        // Draining makes room again
        while idle.try_recv().is_ok() {}
        session.pan_ended(everywhere).unwrap();
        assert_eq!(idle.len(), 16);
    }

    #[test]
    fn test_disconnected_subscribers_are_pruned() {
        let mut session = manual_session(source_with_levels());
        let kept = session.subscribe();
        drop(session.subscribe());

        session.load_mosaic_blocking("img", Duration::from_secs(1)).unwrap();
        assert_eq!(session.subscribers.len(), 1);
        assert!(kept.try_recv().is_ok());
    }
}
