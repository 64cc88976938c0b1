//! Mosaic Viewer Core Library
//!
//! Session controller for progressively loaded mosaic images.
//!
//! A mosaic is a very large raster image stored as a pyramid of tile grids,
//! one per zoom level. [`MosaicSession`] loads the zoom-level catalog from a
//! [`MosaicSource`], keeps the tiles around the viewport loaded, evicts the
//! rest when a pan settles, and makes sure late results of abandoned zoom
//! levels never reach the current grid.

pub mod error;
pub mod events;
pub mod session;
pub mod source;

pub use error::{MosaicError, MosaicResult, SourceError};
pub use events::{SessionEvent, TileChangeStatus};
pub use session::{MosaicSession, SessionState, ViewportUpdate, EVENT_BUFFER};
pub use source::{
    metadata_url, tile_url, DirectorySource, HttpSource, MemorySource, MosaicSource, TileRequest,
};
