//! Tile addressing and image codec.
//!
//! - [`TilePosition`]: `(layer, column, row)` key used by the registry and URL builder
//! - [`Bitmap`]: decoded tile as held by the memory cache
//! - [`TileCodec`]: bytes ⇄ bitmap conversion, with [`JpegTileCodec`] as default

mod codec;
mod position;

pub use codec::{
    Bitmap, JpegTileCodec, TileCodec, DEFAULT_DISK_JPEG_QUALITY, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY,
};
pub use position::TilePosition;
