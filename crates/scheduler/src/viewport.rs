//! Visibility window evaluation
//!
//! Decides which cells of a zoom level must be present for a viewport and
//! which may be evicted. The viewport is padded by a margin of whole tiles
//! on every side, so tiles are prefetched one margin before they scroll into
//! view and released one margin after they leave it. The working set is the
//! visible tiles plus that ring, independent of the total grid size.
//!
//! Tiles are prioritized as follows:
//! 1. Visible tiles (intersecting the viewport itself)
//! 2. Margin tiles (only intersecting the padded window)

use crate::priority::FetchPriority;
use mosaic_render::{frame_for, CellCoord, Rect, ZoomLevel};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;

/// Viewport padded by the prefetch margin for one zoom level
///
/// # Example
///
/// ```
/// use mosaic_render::{CellCoord, Rect, ZoomLevel};
/// use mosaic_scheduler::{FetchPriority, VisibilityWindow};
///
/// let level = ZoomLevel::new(0, 100.0, 256.0, 256.0, 4, 4);
/// let window = VisibilityWindow::new(&level, Rect::new(0.0, 0.0, 512.0, 512.0), 1);
///
/// assert_eq!(window.required_cells().len(), 9);
/// assert_eq!(window.priority_for(CellCoord::new(2, 2)), FetchPriority::Margin);
/// ```
#[derive(Debug, Clone)]
pub struct VisibilityWindow<'a> {
    zoom_level: &'a ZoomLevel,
    visible: Rect,
    padded: Rect,
}

impl<'a> VisibilityWindow<'a> {
    pub fn new(zoom_level: &'a ZoomLevel, visible: Rect, buffer_tiles: u32) -> Self {
        Self { zoom_level, visible, padded: padded_rect(&visible, zoom_level, buffer_tiles) }
    }

    pub fn visible(&self) -> Rect {
        self.visible
    }

    pub fn padded(&self) -> Rect {
        self.padded
    }

    /// Every cell whose frame intersects the padded window, row-major
    pub fn required_cells(&self) -> BTreeSet<CellCoord> {
        let (Some(rows), Some(cols)) = (
            candidate_range(
                self.padded.min_y(),
                self.padded.max_y(),
                self.zoom_level.tile_height,
                self.zoom_level.rows,
            ),
            candidate_range(
                self.padded.min_x(),
                self.padded.max_x(),
                self.zoom_level.tile_width,
                self.zoom_level.cols,
            ),
        ) else {
            return BTreeSet::new();
        };

        let mut cells = BTreeSet::new();
        for row in rows {
            for col in cols.clone() {
                let cell = CellCoord::new(row, col);
                if self.is_required(cell) {
                    cells.insert(cell);
                }
            }
        }
        cells
    }

    /// Required cells in fetch order: visible cells first, then margin
    /// cells, row-major within each group
    pub fn fetch_order(&self) -> Vec<(CellCoord, FetchPriority)> {
        let mut cells: Vec<(CellCoord, FetchPriority)> = self
            .required_cells()
            .into_iter()
            .map(|cell| (cell, self.priority_for(cell)))
            .collect();
        cells.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        cells
    }

    /// Cells among `occupied` whose frame lies outside the padded window
    pub fn evictable_cells<I>(&self, occupied: I) -> Vec<CellCoord>
    where
        I: IntoIterator<Item = CellCoord>,
    {
        occupied
            .into_iter()
            .filter(|cell| self.zoom_level.contains(*cell) && !self.is_required(*cell))
            .collect()
    }

    pub fn is_required(&self, cell: CellCoord) -> bool {
        frame_for(self.zoom_level, cell).intersects(&self.padded)
    }

    pub fn priority_for(&self, cell: CellCoord) -> FetchPriority {
        if frame_for(self.zoom_level, cell).intersects(&self.visible) {
            FetchPriority::Visible
        } else {
            FetchPriority::Margin
        }
    }
}

/// Expand `visible` by `buffer_tiles` whole tiles on all four sides
pub fn padded_rect(visible: &Rect, zoom_level: &ZoomLevel, buffer_tiles: u32) -> Rect {
    let margin = buffer_tiles as f64;
    visible.inset_by(-margin * zoom_level.tile_width, -margin * zoom_level.tile_height)
}

/// Cells that must be present for `visible` with a margin of `buffer_tiles`
pub fn required_cells(
    visible: &Rect,
    zoom_level: &ZoomLevel,
    buffer_tiles: u32,
) -> BTreeSet<CellCoord> {
    VisibilityWindow::new(zoom_level, *visible, buffer_tiles).required_cells()
}

/// Cells among `occupied` that fall outside the padded window
pub fn evictable_cells<I>(
    visible: &Rect,
    zoom_level: &ZoomLevel,
    buffer_tiles: u32,
    occupied: I,
) -> Vec<CellCoord>
where
    I: IntoIterator<Item = CellCoord>,
{
    VisibilityWindow::new(zoom_level, *visible, buffer_tiles).evictable_cells(occupied)
}

/// `Visible` when the cell intersects the unpadded viewport, else `Margin`
pub fn cell_priority(visible: &Rect, zoom_level: &ZoomLevel, cell: CellCoord) -> FetchPriority {
    VisibilityWindow::new(zoom_level, *visible, 0).priority_for(cell)
}

/// Grid indices along one axis that can possibly intersect `[start, end)`
///
/// Only the last tile of an axis may be shorter than `tile`, so dividing by
/// the nominal extent never misses a cell; the exact frame test filters the
/// rest.
fn candidate_range(start: f64, end: f64, tile: f64, count: u32) -> Option<RangeInclusive<u32>> {
    if !(end > start) || !(tile > 0.0) || count == 0 || end <= 0.0 {
        return None;
    }

    let last = count - 1;
    let first = (start / tile).floor().max(0.0);
    if first > last as f64 {
        return None;
    }
    let upper = ((end / tile).ceil() - 1.0).clamp(0.0, last as f64);

    let (first, upper) = (first as u32, upper as u32);
    (first <= upper).then_some(first..=upper)
}
