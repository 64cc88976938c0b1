//! Tile grid geometry
//!
//! Maps a grid cell of a zoom level to its pixel size and position on the
//! level's canvas. Interior tiles have the nominal tile size; tiles in the
//! last row and column are clipped to the canvas edge.

use crate::geometry::{Point, Rect, Size};
use crate::zoom::ZoomLevel;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tile coordinates within a zoom level's grid
///
/// (0, 0) is the top-left tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellCoord {
    pub row: u32,
    pub col: u32,
}

impl CellCoord {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Pixel size of the tile at `(row, col)`
///
/// The caller must pass a cell inside the grid.
pub fn size_for_cell(zoom_level: &ZoomLevel, row: u32, col: u32) -> Size {
    debug_assert!(
        zoom_level.contains(CellCoord::new(row, col)),
        "cell ({row}, {col}) outside {}x{} grid of zoom level {}",
        zoom_level.rows,
        zoom_level.cols,
        zoom_level.index
    );

    let width = if col + 1 == zoom_level.cols {
        zoom_level.last_col_width()
    } else {
        zoom_level.tile_width
    };
    let height = if row + 1 == zoom_level.rows {
        zoom_level.last_row_height()
    } else {
        zoom_level.tile_height
    };

    Size::new(width, height)
}

/// Center of the tile at `(row, col)` in canvas coordinates
///
/// Every tile before the last one along an axis has the nominal size, so
/// the cumulative offset of the preceding tiles is `index * tile extent`.
pub fn position_for_cell(zoom_level: &ZoomLevel, row: u32, col: u32) -> Point {
    let size = size_for_cell(zoom_level, row, col);
    let left = col as f64 * zoom_level.tile_width;
    let top = row as f64 * zoom_level.tile_height;

    Point::new(left + size.width / 2.0, top + size.height / 2.0)
}

/// Rectangle centered at `position` with `size`
pub fn frame_for_cell(position: Point, size: Size) -> Rect {
    Rect::centered(position, size)
}

/// Frame of `cell`, composing size, position and frame
pub fn frame_for(zoom_level: &ZoomLevel, cell: CellCoord) -> Rect {
    let size = size_for_cell(zoom_level, cell.row, cell.col);
    let position = position_for_cell(zoom_level, cell.row, cell.col);
    frame_for_cell(position, size)
}
