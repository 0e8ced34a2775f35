//! Two-tier cache of decoded tiles, keyed by tile URL.
//!
//! ```text
//!             get_async(key)
//!                  │
//!        ┌─────────┴─────────┐
//!        ▼                   │ miss
//!   MemoryTier ──hit──► InMemory(bitmap)
//!                            │
//!                            ▼
//!   DiskTier ready and contains key? ──no──► NotFound
//!                            │ yes
//!                            ▼
//!               OnDisk + background promotion
//!          (read → decode → memory → callbacks)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::memory::MemoryTier;
use super::tier::DiskTier;
use crate::tile::{Bitmap, TileCodec};

/// Default number of decoded tiles kept in memory.
pub const DEFAULT_TILE_MEMORY_ITEMS: usize = 100;

/// Default disk budget for encoded tiles: 100MB
pub const DEFAULT_TILE_DISK_BYTES: u64 = 100 * 1024 * 1024;

/// Result of a non-blocking tile lookup.
#[derive(Debug, Clone)]
pub enum TileLookup {
    /// Ready to draw.
    InMemory(Bitmap),

    /// Being promoted from disk; the callback passed to
    /// [`TileCache::get_async`] fires once that is done.
    OnDisk,

    /// Not cached; the caller should fetch it.
    NotFound,
}

/// Receives the outcome of a disk-to-memory promotion.
///
/// `None` means the disk entry turned out to be unreadable and was dropped.
pub type PromotionCallback = Box<dyn FnOnce(Option<Bitmap>) + Send + 'static>;

/// Memory + disk cache of tile bitmaps.
///
/// Shared between the control side and fetch tasks through an `Arc`.
pub struct TileCache {
    memory: MemoryTier<Bitmap>,
    disk: Arc<DiskTier>,
    codec: Arc<dyn TileCodec>,

    /// Promotions in progress, with the callbacks waiting on each
    promotions: Mutex<HashMap<String, Vec<PromotionCallback>>>,
}

impl TileCache {
    pub fn new(memory_items: usize, disk: Arc<DiskTier>, codec: Arc<dyn TileCodec>) -> Self {
        Self {
            memory: MemoryTier::new(memory_items),
            disk,
            codec,
            promotions: Mutex::new(HashMap::new()),
        }
    }

    /// Cache without a disk tier.
    pub fn memory_only(memory_items: usize, codec: Arc<dyn TileCodec>) -> Self {
        Self::new(memory_items, DiskTier::disabled("tiles"), codec)
    }

    /// Zero-latency check suitable for per-frame draw decisions.
    pub fn contains_in_memory(&self, key: &str) -> bool {
        self.memory.contains(key)
    }

    /// Disk presence check; blocks while the disk tier is still opening.
    pub fn contains_on_disk(&self, key: &str) -> bool {
        self.disk
            .run_blocking(|store| Ok(store.contains(key)))
            .unwrap_or(false)
    }

    /// Non-blocking lookup.
    ///
    /// On [`TileLookup::OnDisk`] the tile is promoted to memory in the
    /// background and `on_disk_hit` fires once with the result. The callback
    /// runs on a tokio worker, not on the caller's task;
    /// [`ImageManager::lookup_tile`](crate::ImageManager::lookup_tile) hands
    /// results back to its owner instead. Concurrent lookups of the same key
    /// share a single promotion. A disk tier that is still opening counts as
    /// a miss.
    pub fn get_async(
        self: &Arc<Self>,
        key: &str,
        on_disk_hit: impl FnOnce(Option<Bitmap>) + Send + 'static,
    ) -> TileLookup {
        if let Some(bitmap) = self.memory.get(key) {
            return TileLookup::InMemory(bitmap);
        }

        let on_disk = self
            .disk
            .try_store()
            .is_some_and(|store| store.contains(key));
        if !on_disk {
            return TileLookup::NotFound;
        }

        {
            let mut promotions = self.promotions.lock();
            if let Some(waiting) = promotions.get_mut(key) {
                waiting.push(Box::new(on_disk_hit));
                return TileLookup::OnDisk;
            }
            promotions.insert(key.to_string(), vec![Box::new(on_disk_hit)]);
        }

        let cache = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            let bitmap = cache.load_from_disk(&key).await;
            let waiting = cache.promotions.lock().remove(&key).unwrap_or_default();
            for callback in waiting {
                callback(bitmap.clone());
            }
        });

        TileLookup::OnDisk
    }

    /// Awaiting lookup: memory, then disk.
    ///
    /// Unlike [`get_async`](Self::get_async) this waits for the disk tier to
    /// open and for the decode to finish.
    pub async fn get(&self, key: &str) -> Option<Bitmap> {
        if let Some(bitmap) = self.memory.get(key) {
            return Some(bitmap);
        }
        self.load_from_disk(key).await
    }

    /// Read, decode and promote a disk entry into memory.
    pub(crate) async fn load_from_disk(&self, key: &str) -> Option<Bitmap> {
        let disk_key = key.to_string();
        let bytes = self
            .disk
            .run(move |store| store.get(&disk_key))
            .await
            .flatten()?;

        let codec = Arc::clone(&self.codec);
        let decoded = tokio::task::spawn_blocking(move || codec.decode(&bytes))
            .await
            .ok()?;

        match decoded {
            Ok(bitmap) => {
                debug!(%key, "Tile promoted from disk");
                Some(self.memory.insert_if_absent(key, bitmap))
            }
            Err(e) => {
                warn!(%key, error = %e, "Dropping undecodable tile from disk cache");
                let disk_key = key.to_string();
                self.disk.run(move |store| store.remove(&disk_key)).await;
                None
            }
        }
    }

    /// Store a bitmap in memory and, encoded, on disk.
    ///
    /// First writer wins on both tiers. Returns the bitmap resident in
    /// memory afterwards.
    pub async fn store(&self, key: &str, bitmap: Bitmap) -> Bitmap {
        let resident = self.memory.insert_if_absent(key, bitmap);

        let disk_key = key.to_string();
        let codec = Arc::clone(&self.codec);
        let to_encode = Arc::clone(&resident);
        self.disk
            .run(move |store| {
                if store.contains(&disk_key) {
                    return Ok(());
                }
                match codec.encode(&to_encode) {
                    Ok(bytes) => store.put(&disk_key, &bytes),
                    Err(e) => {
                        warn!(key = %disk_key, error = %e, "Tile not persisted");
                        Ok(())
                    }
                }
            })
            .await;

        resident
    }

    /// Store a bitmap in memory only, e.g. after reading it from disk.
    pub fn store_in_memory(&self, key: &str, bitmap: Bitmap) -> Bitmap {
        self.memory.insert_if_absent(key, bitmap)
    }

    /// Raise the memory ceiling to at least `min_items`; never lowers it.
    pub fn raise_memory_capacity(&self, min_items: usize) -> bool {
        let raised = self.memory.raise_capacity(min_items);
        if raised {
            debug!(capacity = min_items, "Tile memory cache grown");
        }
        raised
    }

    pub fn memory_capacity(&self) -> usize {
        self.memory.capacity()
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn disk_tier(&self) -> &Arc<DiskTier> {
        &self.disk
    }

    pub fn codec(&self) -> &Arc<dyn TileCodec> {
        &self.codec
    }
}

// =============================================================================
// Tests
// =============================================================================
