//! # zoomify-stream
//!
//! Incremental loading of Zoomify deep-zoom image pyramids.
//!
//! Given the base URL of a pyramid, this library works out which tile of
//! which resolution layer covers a viewport, fetches tiles over HTTP with
//! manual redirect handling, and keeps them in a memory + disk cache so that
//! panning and zooming never waits on the network more than once per tile.
//! It does not draw anything; a viewer asks it for tiles and their image
//! areas and renders them itself.
//!
//! ## Features
//!
//! - **Exact pyramid geometry**: layer count, tile grids, tile groups and
//!   tile areas that match what Zoomify pyramid generators produce
//! - **Redirect-aware protocol clients**: a permanent redirect of the
//!   descriptor moves all later tile requests to the new base URL
//! - **Two-tier caches**: bounded LRU in memory over a journaled LRU store on
//!   disk, degrading to memory-only on disk failure
//! - **Single-flight fetching**: at most one fetch per tile, bounded
//!   concurrency, cooperative cancellation
//!
//! ## Architecture
//!
//! - [`pyramid`] - Descriptor parsing and layer geometry
//! - [`tile`] - Tile positions, bitmaps and the image codec seam
//! - [`protocol`] - HTTP transport seam, redirect handling, protocol clients
//! - [`cache`] - Memory and disk caches for tiles and descriptors
//! - [`fetch`] - Task registry and fetch jobs
//! - [`image`] - [`ImageManager`] facade
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zoomify_stream::{CacheConfig, CacheManager, ImageManager, ManagerConfig, ReqwestTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let caches = Arc::new(CacheManager::open(&CacheConfig::default()));
//!     let transport = Arc::new(ReqwestTransport::new()?);
//!     let mut manager = ImageManager::new(
//!         "https://example.com/pyramid/",
//!         transport,
//!         caches,
//!         ManagerConfig::default(),
//!     )?;
//!
//!     manager.load_metadata().await;
//!     let layer = manager.best_layer(1920.0, 1080.0)?;
//!     println!("layer {} of {}", layer, manager.pyramid()?.layer_count());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod image;
pub mod protocol;
pub mod pyramid;
pub mod tile;

// Re-export commonly used types
pub use cache::{CacheManager, MetadataCache, TileCache, TileLookup};
pub use config::{CacheConfig, Cli, Command, ManagerConfig};
pub use error::{CodecError, DiskCacheError, ErrorKind, FetchError, InvalidArgument, TransportError};
pub use fetch::{Enqueued, FetchOutcome, Listener, LoadedPyramid, TaskRegistry};
pub use image::ImageManager;
pub use protocol::{HttpResponse, HttpTransport, MetadataClient, ReqwestTransport, TileClient};
pub use pyramid::{ImageMetadata, Layer, Pyramid, Rect, Viewport};
pub use tile::{Bitmap, JpegTileCodec, TileCodec, TilePosition};
