//! Work run inside registry tasks.
//!
//! Each job checks its cancellation token before every I/O step. Once a
//! cache write has started it runs to completion; cancelling afterwards only
//! changes the reported outcome.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::outcome::FetchOutcome;
use crate::cache::{CachedDescriptor, MetadataCache, TileCache};
use crate::protocol::{HttpTransport, MetadataClient, TileClient};
use crate::pyramid::{ImageMetadata, Pyramid};
use crate::tile::Bitmap;

/// A pyramid descriptor loaded from cache or network.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPyramid {
    pub pyramid: Pyramid,

    /// Base URL tiles should be requested from; differs from the requested
    /// one after a permanent redirect.
    pub base_url: String,

    pub from_cache: bool,
}

/// Bring one tile into the caches.
///
/// Order: disk (promoting into memory), then network, then both tiers.
pub async fn fetch_tile<T>(
    token: CancellationToken,
    url: String,
    cache: Arc<TileCache>,
    client: Arc<TileClient<T>>,
) -> FetchOutcome<Bitmap>
where
    T: HttpTransport + ?Sized,
{
    if token.is_cancelled() {
        return FetchOutcome::Cancelled;
    }

    let from_disk = tokio::select! {
        _ = token.cancelled() => return FetchOutcome::Cancelled,
        bitmap = cache.load_from_disk(&url) => bitmap,
    };
    if let Some(bitmap) = from_disk {
        debug!(%url, "Tile served from disk cache");
        return FetchOutcome::Success(bitmap);
    }

    let downloaded = tokio::select! {
        _ = token.cancelled() => return FetchOutcome::Cancelled,
        result = client.fetch(&url) => result,
    };
    let bitmap = match downloaded {
        Ok(bitmap) => bitmap,
        Err(e) => {
            debug!(%url, error = %e, "Tile fetch failed");
            return FetchOutcome::Failed(e);
        }
    };

    if token.is_cancelled() {
        return FetchOutcome::Cancelled;
    }
    FetchOutcome::Success(cache.store(&url, bitmap).await)
}

/// Load the descriptor of the pyramid at `base_url`.
///
/// A cached document is used when it still parses; otherwise the network
/// result is parsed and cached under `base_url`. Either way a permanent
/// redirect recorded with the document replaces `base_url`.
pub async fn load_pyramid<T>(
    token: CancellationToken,
    base_url: String,
    cache: Arc<MetadataCache>,
    client: Arc<MetadataClient<T>>,
) -> FetchOutcome<LoadedPyramid>
where
    T: HttpTransport + ?Sized,
{
    if token.is_cancelled() {
        return FetchOutcome::Cancelled;
    }

    let cached = tokio::select! {
        _ = token.cancelled() => return FetchOutcome::Cancelled,
        entry = cache.get(&base_url) => entry,
    };
    if let Some(entry) = cached {
        match ImageMetadata::from_descriptor(&entry.document, &base_url) {
            Ok(metadata) => {
                debug!(%base_url, "Descriptor served from cache");
                return FetchOutcome::Success(LoadedPyramid {
                    pyramid: Pyramid::new(metadata),
                    base_url: entry.canonical_base_url.unwrap_or(base_url),
                    from_cache: true,
                });
            }
            Err(e) => warn!(%base_url, error = %e, "Ignoring unparsable cached descriptor"),
        }
    }

    let downloaded = tokio::select! {
        _ = token.cancelled() => return FetchOutcome::Cancelled,
        result = client.fetch(&base_url) => result,
    };
    let descriptor = match downloaded {
        Ok(descriptor) => descriptor,
        Err(e) => return FetchOutcome::Failed(e),
    };
    let metadata = match ImageMetadata::from_descriptor(&descriptor.document, &descriptor.url) {
        Ok(metadata) => metadata,
        Err(e) => return FetchOutcome::Failed(e),
    };

    if token.is_cancelled() {
        return FetchOutcome::Cancelled;
    }
    let entry = CachedDescriptor::new(descriptor.document, descriptor.canonical_base_url);
    cache.put(&base_url, entry.clone()).await;

    FetchOutcome::Success(LoadedPyramid {
        pyramid: Pyramid::new(metadata),
        base_url: entry.canonical_base_url.unwrap_or(base_url),
        from_cache: false,
    })
}
