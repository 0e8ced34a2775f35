//! Image manager facade.
//!
//! [`ImageManager`] ties one pyramid's geometry to the shared caches and the
//! fetch registries:
//!
//! ```text
//! load_metadata ──► MetadataCache ──miss──► MetadataClient ──► Pyramid
//!
//! viewport ──► best_layer ──► visible_tiles ──► lookup_tile
//!                                                   │ NotFound
//!                                                   ▼
//!                                  enqueue_tile ──► TaskRegistry ──► fetch_tile
//! ```

mod manager;

pub use manager::ImageManager;
