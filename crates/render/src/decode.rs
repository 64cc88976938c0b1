//! Tile payload decoding
//!
//! Tile fetches return raw bytes. A [`TileDecoder`] turns them into an RGBA
//! bitmap that the rendering layer can upload directly.

use std::fmt;

/// Decoding failures
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to decode tile image: {0}")]
    Image(#[from] image::ImageError),

    #[error("raw tile payload is {actual} bytes, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("tile payload is empty")]
    Empty,
}

/// Decoded tile bitmap
///
/// Pixels are tightly packed RGBA8, row-major, `width * height * 4` bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct TileImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TileImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self { width, height, pixels }
    }

    /// Memory held by the pixel buffer in bytes
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

impl fmt::Debug for TileImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Converts a fetched tile payload into a bitmap
///
/// Decoders run on fetch worker threads and must be shareable.
pub trait TileDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<TileImage, DecodeError>;
}

/// Decodes encoded images (JPEG, PNG, WebP) with the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl TileDecoder for ImageDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<TileImage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(TileImage::new(width, height, rgba.into_raw()))
    }
}

/// Accepts payloads that are already RGBA8 bitmaps of a fixed size
#[derive(Debug, Clone, Copy)]
pub struct RawRgbaDecoder {
    pub width: u32,
    pub height: u32,
}

impl RawRgbaDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl TileDecoder for RawRgbaDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<TileImage, DecodeError> {
        let expected = self.width as usize * self.height as usize * 4;
        if bytes.len() != expected {
            return Err(DecodeError::LengthMismatch { expected, actual: bytes.len() });
        }
        Ok(TileImage::new(self.width, self.height, bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();
        bytes
    }

    #[test]
    fn test_image_decoder_produces_rgba() {
        let decoded = ImageDecoder.decode(&encode_png(4, 3)).unwrap();
        assert_eq!((decoded.width, decoded.height), (4, 3));
        assert_eq!(decoded.byte_size(), 4 * 3 * 4);
        assert_eq!(&decoded.pixels[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_image_decoder_rejects_corrupt_payload() {
        assert!(matches!(ImageDecoder.decode(&[]), Err(DecodeError::Empty)));
        assert!(matches!(ImageDecoder.decode(b"definitely not a png"), Err(DecodeError::Image(_))));
    }

    #[test]
    fn test_raw_decoder_checks_length() {
        let decoder = RawRgbaDecoder::new(2, 2);
        assert_eq!(decoder.decode(&[0u8; 16]).unwrap().byte_size(), 16);

        match decoder.decode(&[0u8; 15]) {
            Err(DecodeError::LengthMismatch { expected, actual }) => {
                assert_eq!((expected, actual), (16, 15));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_debug_omits_pixels() {
        let image = TileImage::new(1, 1, vec![1, 2, 3, 4]);
        assert_eq!(format!("{image:?}"), "TileImage { width: 1, height: 1, bytes: 4 }");
    }
}
