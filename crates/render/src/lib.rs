//! Mosaic Render Library
//!
//! Zoom-level catalog, tile geometry and tile decoding for the mosaic viewer.
//!
//! A mosaic is a very large raster image cut into a pyramid of fixed-size
//! tiles. Each pyramid level ([`ZoomLevel`]) has its own grid of rows and
//! columns; the functions in [`tile`] map a grid cell to its pixel frame on
//! the level's canvas.
//!
//! # Example
//!
//! ```
//! use mosaic_render::{frame_for, CellCoord, MosaicMetadata, ZoomLevel};
//!
//! let metadata = MosaicMetadata::new(
//!     "photo",
//!     1000.0,
//!     600.0,
//!     vec![ZoomLevel::new(0, 100.0, 256.0, 256.0, 3, 4)],
//! )
//! .unwrap();
//!
//! let level = metadata.default_zoom_level();
//! let frame = frame_for(level, CellCoord::new(2, 3));
//! assert_eq!(frame.max_x(), 1000.0);
//! assert_eq!(frame.max_y(), 600.0);
//! ```

pub mod decode;
pub mod geometry;
pub mod tile;
pub mod zoom;

pub use decode::{DecodeError, ImageDecoder, RawRgbaDecoder, TileDecoder, TileImage};
pub use geometry::{Point, Rect, Size};
pub use tile::{frame_for, frame_for_cell, position_for_cell, size_for_cell, CellCoord};
pub use zoom::{MetadataError, MosaicMetadata, ZoomLevel};
