//! Mosaic Cache Library
//!
//! Sparse tile grid for the selected zoom level, plus viewer configuration.

pub mod config;
pub mod grid;

pub use config::{ConfigError, ViewerConfig};
pub use grid::{
    ApplyOutcome, EvictOutcome, FetchTicket, GridStats, RetryPolicy, TileGrid, TileState,
    TileStatus,
};
