//! Two-tier caching of tiles and descriptors.
//!
//! Each cache pairs a bounded LRU in memory with an LRU store on disk:
//!
//! - [`TileCache`]: decoded tile bitmaps, re-encoded as JPEG on disk
//! - [`MetadataCache`]: `ImageProperties.xml` documents with their canonical base URL
//! - [`CacheManager`]: opens both under one root directory
//!
//! Disk stores open on a background thread and degrade to memory-only
//! operation on any I/O failure.

mod disk;
mod manager;
mod memory;
mod metadata;
mod tier;
mod tile;

pub use disk::{hash_key, DiskStore, DISK_FORMAT_VERSION};
pub use manager::CacheManager;
pub use memory::MemoryTier;
pub use metadata::{
    CachedDescriptor, MetadataCache, DEFAULT_METADATA_DISK_BYTES, DEFAULT_METADATA_MEMORY_ITEMS,
};
pub use tier::{DiskSettings, DiskTier};
pub use tile::{
    PromotionCallback, TileCache, TileLookup, DEFAULT_TILE_DISK_BYTES, DEFAULT_TILE_MEMORY_ITEMS,
};
