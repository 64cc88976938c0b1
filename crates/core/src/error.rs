//! Error taxonomy for mosaic sessions and sources

use crate::session::SessionState;
use mosaic_render::MetadataError;
use mosaic_scheduler::BoxError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a [`MosaicSource`](crate::MosaicSource)
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("invalid metadata: {0}")]
    Metadata(#[from] MetadataError),

    /// An id or extension that cannot be used as a single path segment
    #[error("invalid {kind} '{value}'")]
    InvalidSegment { kind: &'static str, value: String },

    #[error("invalid base URL '{url}': {reason}")]
    BaseUrl { url: String, reason: String },
}

/// Session-level errors
#[derive(Debug, Error)]
pub enum MosaicError {
    /// Metadata could not be fetched or parsed. The session is back in
    /// `Uninitialized` and `load_mosaic` may be called again.
    #[error("failed to load metadata for '{image_id}': {source}")]
    MetadataLoad {
        image_id: String,
        #[source]
        source: BoxError,
    },

    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("unknown zoom level {0}")]
    UnknownZoomLevel(u32),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to start fetch workers: {0}")]
    Spawn(#[from] io::Error),
}

pub type MosaicResult<T> = Result<T, MosaicError>;
