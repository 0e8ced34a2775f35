use std::sync::Arc;

use tracing::info;

use super::metadata::MetadataCache;
use super::tier::{DiskSettings, DiskTier};
use super::tile::TileCache;
use crate::config::{CacheConfig, METADATA_SUBDIR, TILES_SUBDIR};
use crate::tile::{JpegTileCodec, TileCodec};

/// Owns the tile and descriptor caches.
///
/// Built once per process and handed to every
/// [`ImageManager`](crate::ImageManager) that should share it.
pub struct CacheManager {
    tiles: Arc<TileCache>,
    metadata: Arc<MetadataCache>,
}

impl CacheManager {
    /// Open both caches as described by `config`.
    ///
    /// Disk tiers open in the background; this returns immediately.
    pub fn open(config: &CacheConfig) -> Self {
        let codec: Arc<dyn TileCodec> = Arc::new(JpegTileCodec::new(config.disk_jpeg_quality));
        Self::open_with_codec(config, codec)
    }

    pub fn open_with_codec(config: &CacheConfig, codec: Arc<dyn TileCodec>) -> Self {
        let (tile_disk, metadata_disk) = match &config.directory {
            Some(root) => {
                info!(dir = %root.display(), clear = config.clear_on_start, "Opening disk caches");
                let settings = |subdir: &str, max_bytes: u64| DiskSettings {
                    directory: root.join(subdir),
                    app_version: config.app_version,
                    max_bytes,
                    clear_on_open: config.clear_on_start,
                };
                (
                    DiskTier::open("tiles", settings(TILES_SUBDIR, config.tile_disk_bytes)),
                    DiskTier::open(
                        "metadata",
                        settings(METADATA_SUBDIR, config.metadata_disk_bytes),
                    ),
                )
            }
            None => {
                info!("Disk caches disabled, running memory-only");
                (DiskTier::disabled("tiles"), DiskTier::disabled("metadata"))
            }
        };

        Self {
            tiles: Arc::new(TileCache::new(config.tile_memory_items, tile_disk, codec)),
            metadata: Arc::new(MetadataCache::new(
                config.metadata_memory_items,
                metadata_disk,
            )),
        }
    }

    /// Memory-only caches with default budgets.
    pub fn memory_only() -> Self {
        Self::open(&CacheConfig::memory_only())
    }

    pub fn tiles(&self) -> &Arc<TileCache> {
        &self.tiles
    }

    pub fn metadata(&self) -> &Arc<MetadataCache> {
        &self.metadata
    }

    /// Flush both disk journals.
    pub fn flush(&self) {
        self.tiles.disk_tier().flush();
        self.metadata.disk_tier().flush();
    }

    /// Flush and release both caches.
    ///
    /// Stores still referenced by running fetch tasks stay open until those
    /// tasks finish.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.flush();
    }
}
