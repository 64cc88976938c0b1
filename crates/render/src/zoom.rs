//! Zoom-level catalog
//!
//! Describes the pyramid levels available for one mosaic. The catalog is
//! fetched once per session and never changes afterwards.

use crate::geometry::Size;
use crate::tile::CellCoord;
use serde::{Deserialize, Serialize};

/// Errors produced while building or parsing a catalog
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("mosaic metadata has no zoom levels")]
    NoZoomLevels,

    #[error("zoom level {index} is invalid: {reason}")]
    InvalidZoomLevel { index: u32, reason: &'static str },

    #[error("zoom level index {0} appears more than once")]
    DuplicateIndex(u32),

    #[error("failed to parse mosaic metadata: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One resolution tier of the mosaic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoomLevel {
    /// Level index used when requesting tiles
    pub index: u32,

    /// Scale of this level relative to the full-resolution image (100 = full size)
    pub scale_down_percentage: f64,

    /// Width of an interior tile in canvas pixels
    pub tile_width: f64,

    /// Height of an interior tile in canvas pixels
    pub tile_height: f64,

    /// Number of tile rows
    pub rows: u32,

    /// Number of tile columns
    pub cols: u32,

    /// Canvas width at this level, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,

    /// Canvas height at this level, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

impl ZoomLevel {
    /// Create a zoom level whose canvas is an exact multiple of the tile size
    pub fn new(
        index: u32,
        scale_down_percentage: f64,
        tile_width: f64,
        tile_height: f64,
        rows: u32,
        cols: u32,
    ) -> Self {
        Self {
            index,
            scale_down_percentage,
            tile_width,
            tile_height,
            rows,
            cols,
            width: None,
            height: None,
        }
    }

    /// Set an explicit canvas size (clips the last row and column)
    pub fn with_canvas_size(mut self, width: f64, height: f64) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Number of cells in the grid
    pub fn cell_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// Returns `true` if `cell` addresses a tile of this level
    pub fn contains(&self, cell: CellCoord) -> bool {
        cell.row < self.rows && cell.col < self.cols
    }

    /// Size of the full canvas at this level
    pub fn canvas_size(&self) -> Size {
        let full_width = self.cols as f64 * self.tile_width;
        let full_height = self.rows as f64 * self.tile_height;
        Size::new(
            clip_extent(self.width, full_width, self.tile_width),
            clip_extent(self.height, full_height, self.tile_height),
        )
    }

    /// Width of the tiles in the last column
    pub fn last_col_width(&self) -> f64 {
        self.canvas_size().width - self.cols.saturating_sub(1) as f64 * self.tile_width
    }

    /// Height of the tiles in the last row
    pub fn last_row_height(&self) -> f64 {
        self.canvas_size().height - self.rows.saturating_sub(1) as f64 * self.tile_height
    }

    fn validate(&self) -> Result<(), MetadataError> {
        let invalid = |reason| MetadataError::InvalidZoomLevel { index: self.index, reason };

        if self.rows == 0 || self.cols == 0 {
            return Err(invalid("grid has no rows or columns"));
        }
        if !(self.tile_width > 0.0 && self.tile_height > 0.0) {
            return Err(invalid("tile dimensions must be positive"));
        }
        if !(self.scale_down_percentage > 0.0) {
            return Err(invalid("scale-down percentage must be positive"));
        }
        Ok(())
    }

    /// Fill in the canvas size from the full-resolution image size if the
    /// metadata did not carry one.
    fn resolve_canvas(&mut self, image_width: f64, image_height: f64) {
        let scale = self.scale_down_percentage / 100.0;
        if self.width.is_none() && image_width > 0.0 {
            self.width = Some((image_width * scale).round());
        }
        if self.height.is_none() && image_height > 0.0 {
            self.height = Some((image_height * scale).round());
        }
        let canvas = self.canvas_size();
        self.width = Some(canvas.width);
        self.height = Some(canvas.height);
    }
}

/// Clamp a declared canvas extent into the range the grid can actually cover.
///
/// The last tile must keep a positive extent no larger than a full tile, so
/// anything outside `((n - 1) * tile, n * tile]` falls back to the full grid.
fn clip_extent(declared: Option<f64>, full: f64, tile: f64) -> f64 {
    match declared {
        Some(extent) if extent > full - tile && extent <= full => extent,
        _ => full,
    }
}

fn default_extension() -> String {
    "jpg".to_string()
}

/// Static description of one mosaic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MosaicMetadata {
    /// Identifier of the image this mosaic was built from
    #[serde(default)]
    pub image_id: String,

    /// Full-resolution image width in pixels
    #[serde(default)]
    pub width: f64,

    /// Full-resolution image height in pixels
    #[serde(default)]
    pub height: f64,

    /// File extension of the tile payloads
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Available levels, ordered by index
    pub zoom_levels: Vec<ZoomLevel>,
}

impl MosaicMetadata {
    /// Build and validate a catalog
    ///
    /// Levels are sorted by index and their canvas sizes are resolved from
    /// the full-resolution image size.
    pub fn new(
        image_id: impl Into<String>,
        width: f64,
        height: f64,
        zoom_levels: Vec<ZoomLevel>,
    ) -> Result<Self, MetadataError> {
        let mut metadata = Self {
            image_id: image_id.into(),
            width,
            height,
            extension: default_extension(),
            zoom_levels,
        };
        metadata.normalize()?;
        Ok(metadata)
    }

    /// Parse a catalog from its JSON form
    pub fn from_json(bytes: &[u8]) -> Result<Self, MetadataError> {
        let mut metadata: Self = serde_json::from_slice(bytes)?;
        metadata.normalize()?;
        Ok(metadata)
    }

    /// Serialize the catalog to pretty JSON
    pub fn to_json(&self) -> Result<String, MetadataError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_image_id(mut self, image_id: impl Into<String>) -> Self {
        self.image_id = image_id.into();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn zoom_levels(&self) -> &[ZoomLevel] {
        &self.zoom_levels
    }

    /// Look up a level by its index
    pub fn zoom_level(&self, index: u32) -> Option<&ZoomLevel> {
        self.zoom_levels.iter().find(|level| level.index == index)
    }

    pub fn first(&self) -> Option<&ZoomLevel> {
        self.zoom_levels.first()
    }

    /// The level selected when a session starts: the lowest index
    pub fn default_zoom_level(&self) -> &ZoomLevel {
        // normalize() guarantees at least one level
        &self.zoom_levels[0]
    }

    fn normalize(&mut self) -> Result<(), MetadataError> {
        if self.zoom_levels.is_empty() {
            return Err(MetadataError::NoZoomLevels);
        }

        self.zoom_levels.sort_by_key(|level| level.index);
        for pair in self.zoom_levels.windows(2) {
            if pair[0].index == pair[1].index {
                return Err(MetadataError::DuplicateIndex(pair[0].index));
            }
        }

        for level in &mut self.zoom_levels {
            level.validate()?;
            level.resolve_canvas(self.width, self.height);
        }

        Ok(())
    }
}
