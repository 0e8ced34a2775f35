//! Tile image codec.
//!
//! The caches hold decoded bitmaps in memory and encoded bytes on disk. The
//! conversion between both goes through [`TileCodec`] so the platform decoder
//! can be swapped out; [`JpegTileCodec`] is the default, built on the `image`
//! crate.

use std::io::Cursor;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, ImageFormat, ImageReader};

use crate::error::CodecError;

/// Decoded tile image, shared between the memory cache and listeners.
pub type Bitmap = Arc<DynamicImage>;

/// Default JPEG quality used when writing tiles to the disk cache.
pub const DEFAULT_DISK_JPEG_QUALITY: u8 = 90;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Converts between encoded tile bytes and decoded bitmaps.
///
/// Both operations are CPU bound; callers run them on blocking threads.
pub trait TileCodec: Send + Sync {
    /// Decode bytes received from a server or read back from disk.
    fn decode(&self, data: &[u8]) -> Result<Bitmap, CodecError>;

    /// Encode a bitmap for storage in the disk cache.
    fn encode(&self, bitmap: &DynamicImage) -> Result<Vec<u8>, CodecError>;
}

// =============================================================================
// JPEG Codec
// =============================================================================

/// JPEG codec for Zoomify tiles.
///
/// Tiles are always `.jpg` on the server side. Bitmaps are re-encoded as RGB
/// JPEG at a fixed quality when persisted.
#[derive(Debug, Clone)]
pub struct JpegTileCodec {
    quality: u8,
}

impl JpegTileCodec {
    /// Create a codec writing at `quality`, clamped to 1..=100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegTileCodec {
    fn default() -> Self {
        Self::new(DEFAULT_DISK_JPEG_QUALITY)
    }
}

impl TileCodec for JpegTileCodec {
    fn decode(&self, data: &[u8]) -> Result<Bitmap, CodecError> {
        let reader = ImageReader::with_format(Cursor::new(data), ImageFormat::Jpeg);
        let image = reader.decode().map_err(|e| CodecError::Decode {
            message: e.to_string(),
        })?;
        Ok(Arc::new(image))
    }

    fn encode(&self, bitmap: &DynamicImage) -> Result<Vec<u8>, CodecError> {
        // JPEG has no alpha channel
        let rgb = bitmap.to_rgb8();

        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, self.quality);
        encoder
            .encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
            .map_err(|e| CodecError::Encode {
                message: e.to_string(),
            })?;

        Ok(output)
    }
}

// =============================================================================
// Tests
// =============================================================================
