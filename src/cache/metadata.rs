use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::memory::MemoryTier;
use super::tier::DiskTier;

/// Default number of descriptor documents kept in memory.
pub const DEFAULT_METADATA_MEMORY_ITEMS: usize = 10;

/// Default disk budget for descriptor documents: 10MB
pub const DEFAULT_METADATA_DISK_BYTES: u64 = 10 * 1024 * 1024;

/// A descriptor document as it was downloaded for one requested base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedDescriptor {
    pub document: String,
    /// Base URL announced by a permanent redirect of the descriptor request.
    #[serde(default)]
    pub canonical_base_url: Option<String>,
}

impl CachedDescriptor {
    pub fn new(document: impl Into<String>, canonical_base_url: Option<String>) -> Self {
        Self {
            document: document.into(),
            canonical_base_url,
        }
    }
}

/// Two-tier cache of descriptor documents, keyed by requested base URL.
///
/// Entries are stored on disk as JSON so a permanent redirect survives
/// restarts. A descriptor never changes for a given base URL, so writes are
/// first-writer-wins on both tiers.
pub struct MetadataCache {
    memory: MemoryTier<CachedDescriptor>,
    disk: Arc<DiskTier>,
}

impl MetadataCache {
    pub fn new(memory_items: usize, disk: Arc<DiskTier>) -> Self {
        Self {
            memory: MemoryTier::new(memory_items),
            disk,
        }
    }

    /// Cache without a disk tier.
    pub fn memory_only(memory_items: usize) -> Self {
        Self::new(memory_items, DiskTier::disabled("metadata"))
    }

    /// Look up a descriptor, falling back to disk.
    ///
    /// A disk hit is copied into memory before returning. Waits for the disk
    /// tier to finish opening.
    pub async fn get(&self, base_url: &str) -> Option<CachedDescriptor> {
        if let Some(entry) = self.memory.get(base_url) {
            debug!(%base_url, "Descriptor memory hit");
            return Some(entry);
        }

        let key = base_url.to_string();
        let bytes = self.disk.run(move |store| store.get(&key)).await.flatten()?;

        match serde_json::from_slice::<CachedDescriptor>(&bytes) {
            Ok(entry) => {
                debug!(%base_url, "Descriptor disk hit");
                Some(self.memory.insert_if_absent(base_url, entry))
            }
            Err(e) => {
                warn!(%base_url, error = %e, "Dropping undecodable descriptor from disk cache");
                let key = base_url.to_string();
                self.disk.run(move |store| store.remove(&key)).await;
                None
            }
        }
    }

    /// Store a descriptor in both tiers unless already present.
    pub async fn put(&self, base_url: &str, entry: CachedDescriptor) {
        let entry = self.memory.insert_if_absent(base_url, entry);
        let bytes = match serde_json::to_vec(&entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(%base_url, error = %e, "Cannot serialize descriptor for disk cache");
                return;
            }
        };

        let key = base_url.to_string();
        self.disk
            .run(move |store| {
                if store.contains(&key) {
                    return Ok(());
                }
                store.put(&key, &bytes)
            })
            .await;
    }

    pub fn contains_in_memory(&self, base_url: &str) -> bool {
        self.memory.contains(base_url)
    }

    /// Blocks while the disk tier is still opening.
    pub fn contains_on_disk(&self, base_url: &str) -> bool {
        self.disk
            .run_blocking(|store| Ok(store.contains(base_url)))
            .unwrap_or(false)
    }

    pub fn disk_tier(&self) -> &Arc<DiskTier> {
        &self.disk
    }
}
