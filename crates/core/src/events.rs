//! Change notifications published by a session

use mosaic_render::CellCoord;
use serde::Serialize;

/// New status of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TileChangeStatus {
    /// A fetch was issued
    Loading,
    Loaded,
    Failed,

    /// The cell left the working set and was released
    Evicted,
}

/// Event delivered to every subscriber of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    MetadataLoaded { image_id: String, zoom_index: u32 },
    MetadataFailed { image_id: String, error: String },
    ZoomLevelChanged { generation: u64, zoom_index: u32 },
    TileChanged { generation: u64, cell: CellCoord, status: TileChangeStatus },
}

impl SessionEvent {
    pub fn cell(&self) -> Option<CellCoord> {
        match self {
            SessionEvent::TileChanged { cell, .. } => Some(*cell),
            _ => None,
        }
    }
}
