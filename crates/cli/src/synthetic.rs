//! Generated mosaics for demos and test fixtures
//!
//! Every level halves the resolution of the next one; the highest index is
//! full size. Tiles are flat PNG swatches whose color encodes the cell.

use anyhow::{Context, Result};
use image::{ImageFormat, Rgba, RgbaImage};
use mosaic_render::{frame_for, CellCoord, MosaicMetadata, ZoomLevel};
use std::io::Cursor;

pub const EXTENSION: &str = "png";

/// Shape of a generated mosaic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticMosaic {
    pub image_id: String,
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub levels: u32,
}

impl SyntheticMosaic {
    pub fn new(image_id: impl Into<String>, width: u32, height: u32) -> Self {
        Self { image_id: image_id.into(), width, height, tile_size: 256, levels: 1 }
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_levels(mut self, levels: u32) -> Self {
        self.levels = levels;
        self
    }

    /// Catalog describing the pyramid
    pub fn metadata(&self) -> Result<MosaicMetadata> {
        if self.width == 0 || self.height == 0 {
            anyhow::bail!("mosaic size must be positive");
        }
        if self.tile_size == 0 {
            anyhow::bail!("--tile must be >= 1");
        }
        if self.levels == 0 || self.levels > 16 {
            anyhow::bail!("--levels must be between 1 and 16");
        }

        let levels = (0..self.levels).map(|index| self.level(index)).collect();
        let metadata = MosaicMetadata::new(
            self.image_id.clone(),
            f64::from(self.width),
            f64::from(self.height),
            levels,
        )
        .context("generated catalog is invalid")?;

        Ok(metadata.with_extension(EXTENSION))
    }

    /// Encode every tile of `metadata` and hand it to `sink`
    pub fn for_each_tile<F>(&self, metadata: &MosaicMetadata, mut sink: F) -> Result<usize>
    where
        F: FnMut(u32, CellCoord, Vec<u8>) -> Result<()>,
    {
        let mut count = 0;
        for level in metadata.zoom_levels() {
            for row in 0..level.rows {
                for col in 0..level.cols {
                    let cell = CellCoord::new(row, col);
                    let frame = frame_for(level, cell);
                    let bytes = encode_tile(
                        frame.width as u32,
                        frame.height as u32,
                        tile_color(level.index, cell),
                    )?;
                    sink(level.index, cell, bytes)?;
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    fn level(&self, index: u32) -> ZoomLevel {
        let shift = self.levels - 1 - index;
        let percentage = 100.0 / f64::from(1u32 << shift);
        let canvas_width = scaled_extent(self.width, percentage);
        let canvas_height = scaled_extent(self.height, percentage);
        let tile = f64::from(self.tile_size);

        ZoomLevel::new(
            index,
            percentage,
            tile,
            tile,
            (canvas_height / tile).ceil() as u32,
            (canvas_width / tile).ceil() as u32,
        )
        .with_canvas_size(canvas_width, canvas_height)
    }
}

fn scaled_extent(extent: u32, percentage: f64) -> f64 {
    (f64::from(extent) * percentage / 100.0).round().max(1.0)
}

fn tile_color(zoom_index: u32, cell: CellCoord) -> Rgba<u8> {
    Rgba([
        (cell.col.wrapping_mul(37) % 256) as u8,
        (cell.row.wrapping_mul(59) % 256) as u8,
        (zoom_index.wrapping_mul(83) % 256) as u8,
        255,
    ])
}

fn encode_tile(width: u32, height: u32, color: Rgba<u8>) -> Result<Vec<u8>> {
    let image = RgbaImage::from_pixel(width.max(1), height.max(1), color);
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png).context("failed to encode tile")?;
    Ok(bytes.into_inner())
}
