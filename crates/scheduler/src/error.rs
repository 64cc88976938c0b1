use crate::worker::BoxError;
use mosaic_render::DecodeError;
use thiserror::Error;

/// Failure of a single tile fetch
///
/// Tile failures stay local to their cell: the grid records them as failed
/// and the next visibility pass retries.
#[derive(Debug, Error)]
pub enum TileFetchError {
    #[error("tile fetch failed: {0}")]
    Fetch(#[source] BoxError),

    #[error("tile decode failed: {0}")]
    Decode(#[from] DecodeError),
}
