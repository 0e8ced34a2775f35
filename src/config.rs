//! Configuration for zoomify-stream.
//!
//! Two layers of configuration live here:
//!
//! - [`ManagerConfig`] and [`CacheConfig`]: plain structs consumed by the
//!   library, with defaults matching what Zoomify viewers usually run with
//! - [`Cli`]: the command-line interface of the `zoomify-stream` binary,
//!   built with clap, which maps onto the two structs above
//!
//! # Environment Variables
//!
//! Every runtime option of the binary can also be set with a `ZOOMIFY_`
//! prefixed variable:
//!
//! - `ZOOMIFY_CACHE_DIR` - Cache root directory (default: platform cache dir)
//! - `ZOOMIFY_NO_DISK_CACHE` - Keep everything in memory
//! - `ZOOMIFY_CLEAR_CACHE` - Wipe the disk caches on start
//! - `ZOOMIFY_CACHE_TILES` - Decoded tiles kept in memory (default: 100)
//! - `ZOOMIFY_CACHE_TILES_DISK_MB` - Disk budget for tiles (default: 100)
//! - `ZOOMIFY_METADATA_TIMEOUT_MS` - Descriptor request timeout (default: 3000)
//! - `ZOOMIFY_TILE_TIMEOUT_MS` - Tile request timeout (default: 5000)
//! - `ZOOMIFY_MAX_REDIRECTIONS` - Requests per fetch, redirects included (default: 5)
//! - `ZOOMIFY_MAX_TASKS` - Concurrent tile fetches (default: 50)
//! - `ZOOMIFY_PX_RATIO` - Pixel vs density-independent pixel mix (default: 0.5)
//! - `ZOOMIFY_DENSITY` - Display density (default: 1.0)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::cache::{
    DEFAULT_METADATA_DISK_BYTES, DEFAULT_METADATA_MEMORY_ITEMS, DEFAULT_TILE_DISK_BYTES,
    DEFAULT_TILE_MEMORY_ITEMS,
};
use crate::error::InvalidArgument;
use crate::pyramid::Viewport;
use crate::tile::DEFAULT_DISK_JPEG_QUALITY;

// =============================================================================
// Default Values
// =============================================================================

/// Default timeout of one descriptor request.
pub const DEFAULT_METADATA_TIMEOUT_MS: u64 = 3000;

/// Default timeout of one tile request.
pub const DEFAULT_TILE_TIMEOUT_MS: u64 = 5000;

/// Default number of requests per fetch, redirects included.
pub const DEFAULT_MAX_REDIRECTIONS: u32 = 5;

/// Default ceiling of concurrently running tile fetches.
pub const DEFAULT_MAX_TILE_TASKS: usize = 50;

/// Default weight of physical pixels when sizing the viewport.
pub const DEFAULT_PX_RATIO: f64 = 0.5;

/// Default display density (physical pixels per density-independent pixel).
pub const DEFAULT_DISPLAY_DENSITY: f64 = 1.0;

/// Default headroom of the tile memory cache over the visible tile count.
pub const DEFAULT_MEMORY_MULTIPLIER: f64 = 1.25;

/// Default application version stamped into disk caches.
pub const DEFAULT_APP_VERSION: u32 = 1;

/// Subdirectory of the cache root holding tiles.
pub const TILES_SUBDIR: &str = "tiles";

/// Subdirectory of the cache root holding descriptors.
pub const METADATA_SUBDIR: &str = "imageProperties";

/// Default cache root: `<platform cache dir>/zoomify-stream`.
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("zoomify-stream"))
}

// =============================================================================
// Library Configuration
// =============================================================================

/// Network and viewport policy of an [`ImageManager`](crate::ImageManager).
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    /// Timeout of one descriptor request
    pub metadata_timeout: Duration,

    /// Timeout of one tile request
    pub tile_timeout: Duration,

    /// Requests per fetch, redirects included
    pub max_redirections: u32,

    /// Tile fetches allowed to run at once; excess enqueues are dropped
    pub max_tile_tasks: usize,

    /// Weight of physical pixels vs density-independent pixels, in `[0, 1]`
    pub px_ratio: f64,

    /// Physical pixels per density-independent pixel
    pub display_density: f64,

    /// Tile memory ceiling as a multiple of the visible tile count
    pub memory_multiplier: f64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            metadata_timeout: Duration::from_millis(DEFAULT_METADATA_TIMEOUT_MS),
            tile_timeout: Duration::from_millis(DEFAULT_TILE_TIMEOUT_MS),
            max_redirections: DEFAULT_MAX_REDIRECTIONS,
            max_tile_tasks: DEFAULT_MAX_TILE_TASKS,
            px_ratio: DEFAULT_PX_RATIO,
            display_density: DEFAULT_DISPLAY_DENSITY,
            memory_multiplier: DEFAULT_MEMORY_MULTIPLIER,
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<(), InvalidArgument> {
        if !(0.0..=1.0).contains(&self.px_ratio) {
            return Err(InvalidArgument::PxRatio(self.px_ratio));
        }
        if !(self.display_density > 0.0 && self.display_density.is_finite()) {
            return Err(InvalidArgument::Density(self.display_density));
        }
        Ok(())
    }
}

/// Location and budgets of the tile and descriptor caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Cache root; `None` keeps everything in memory
    pub directory: Option<PathBuf>,

    /// Wipe both disk caches when they open
    pub clear_on_start: bool,

    /// Stamped into disk caches; a change wipes them
    pub app_version: u32,

    pub tile_memory_items: usize,
    pub tile_disk_bytes: u64,
    pub metadata_memory_items: usize,
    pub metadata_disk_bytes: u64,

    /// JPEG quality of tiles written to disk
    pub disk_jpeg_quality: u8,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_dir(),
            clear_on_start: false,
            app_version: DEFAULT_APP_VERSION,
            tile_memory_items: DEFAULT_TILE_MEMORY_ITEMS,
            tile_disk_bytes: DEFAULT_TILE_DISK_BYTES,
            metadata_memory_items: DEFAULT_METADATA_MEMORY_ITEMS,
            metadata_disk_bytes: DEFAULT_METADATA_DISK_BYTES,
            disk_jpeg_quality: DEFAULT_DISK_JPEG_QUALITY,
        }
    }
}

impl CacheConfig {
    /// Memory-only configuration with default budgets.
    pub fn memory_only() -> Self {
        Self {
            directory: None,
            ..Self::default()
        }
    }

    /// Configuration rooted at `directory`.
    pub fn with_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Some(directory.into()),
            ..Self::default()
        }
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// zoomify-stream - inspect and prefetch Zoomify deep-zoom pyramids.
#[derive(Parser, Debug, Clone)]
#[command(name = "zoomify-stream")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Load a pyramid descriptor and print its layer structure.
    Info(InfoConfig),

    /// List the tiles a viewport needs, with their URLs and image areas.
    Tiles(TilesConfig),

    /// Fetch the tiles a viewport needs into the caches.
    Fetch(TilesConfig),
}

/// Arguments of `info`.
#[derive(Args, Debug, Clone)]
pub struct InfoConfig {
    /// Pyramid base URL (the directory holding ImageProperties.xml).
    pub base_url: String,

    /// Print JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(flatten)]
    pub runtime: RuntimeOptions,
}

/// Arguments of `tiles` and `fetch`.
#[derive(Args, Debug, Clone)]
pub struct TilesConfig {
    /// Pyramid base URL (the directory holding ImageProperties.xml).
    pub base_url: String,

    /// Viewport size on screen in pixels, as WIDTHxHEIGHT.
    #[arg(long, value_parser = parse_viewport_size, default_value = "1024x768")]
    pub viewport: ViewportSize,

    /// Visible image area as LEFT,TOP,RIGHT,BOTTOM in full-resolution pixels.
    ///
    /// Defaults to the whole image.
    #[arg(long, value_parser = parse_rect)]
    pub rect: Option<Viewport>,

    /// Use this layer instead of the best one for the viewport.
    #[arg(long)]
    pub layer: Option<u32>,

    /// Print JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(flatten)]
    pub runtime: RuntimeOptions,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct RuntimeOptions {
    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Cache root directory.
    ///
    /// Defaults to the platform cache directory.
    #[arg(long, env = "ZOOMIFY_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Disable the disk caches.
    #[arg(long, default_value_t = false, env = "ZOOMIFY_NO_DISK_CACHE")]
    pub no_disk_cache: bool,

    /// Wipe the disk caches on start.
    #[arg(long, default_value_t = false, env = "ZOOMIFY_CLEAR_CACHE")]
    pub clear_cache: bool,

    /// Maximum number of decoded tiles kept in memory.
    #[arg(long, default_value_t = DEFAULT_TILE_MEMORY_ITEMS, env = "ZOOMIFY_CACHE_TILES")]
    pub cache_tiles: usize,

    /// Disk budget for tiles in megabytes.
    #[arg(long, default_value_t = DEFAULT_TILE_DISK_BYTES / (1024 * 1024), env = "ZOOMIFY_CACHE_TILES_DISK_MB")]
    pub cache_tiles_disk_mb: u64,

    // =========================================================================
    // Network Configuration
    // =========================================================================
    /// Timeout of one descriptor request in milliseconds.
    #[arg(long, default_value_t = DEFAULT_METADATA_TIMEOUT_MS, env = "ZOOMIFY_METADATA_TIMEOUT_MS")]
    pub metadata_timeout_ms: u64,

    /// Timeout of one tile request in milliseconds.
    #[arg(long, default_value_t = DEFAULT_TILE_TIMEOUT_MS, env = "ZOOMIFY_TILE_TIMEOUT_MS")]
    pub tile_timeout_ms: u64,

    /// Requests per fetch, redirects included.
    #[arg(long, default_value_t = DEFAULT_MAX_REDIRECTIONS, env = "ZOOMIFY_MAX_REDIRECTIONS")]
    pub max_redirections: u32,

    /// Maximum number of concurrent tile fetches.
    #[arg(long, default_value_t = DEFAULT_MAX_TILE_TASKS, env = "ZOOMIFY_MAX_TASKS")]
    pub max_tasks: usize,

    // =========================================================================
    // Viewport Configuration
    // =========================================================================
    /// Weight of physical pixels vs density-independent pixels (0 to 1).
    #[arg(long, default_value_t = DEFAULT_PX_RATIO, env = "ZOOMIFY_PX_RATIO")]
    pub px_ratio: f64,

    /// Display density.
    #[arg(long, default_value_t = DEFAULT_DISPLAY_DENSITY, env = "ZOOMIFY_DENSITY")]
    pub density: f64,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl RuntimeOptions {
    /// Validate the options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_tiles == 0 {
            return Err("cache_tiles must be greater than 0".to_string());
        }
        if self.max_tasks == 0 {
            return Err("max_tasks must be greater than 0".to_string());
        }
        if self.max_redirections == 0 {
            return Err("max_redirections must be greater than 0".to_string());
        }
        if self.metadata_timeout_ms == 0 || self.tile_timeout_ms == 0 {
            return Err("timeouts must be greater than 0".to_string());
        }
        self.manager_config().validate().map_err(|e| e.to_string())
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            metadata_timeout: Duration::from_millis(self.metadata_timeout_ms),
            tile_timeout: Duration::from_millis(self.tile_timeout_ms),
            max_redirections: self.max_redirections,
            max_tile_tasks: self.max_tasks,
            px_ratio: self.px_ratio,
            display_density: self.density,
            ..ManagerConfig::default()
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        let directory = if self.no_disk_cache {
            None
        } else {
            self.cache_dir.clone().or_else(default_cache_dir)
        };

        CacheConfig {
            directory,
            clear_on_start: self.clear_cache,
            tile_memory_items: self.cache_tiles,
            tile_disk_bytes: self.cache_tiles_disk_mb * 1024 * 1024,
            ..CacheConfig::default()
        }
    }
}

// =============================================================================
// Value Parsers
// =============================================================================

/// Viewport size on screen, in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

/// Parse `WIDTHxHEIGHT`.
pub fn parse_viewport_size(value: &str) -> Result<ViewportSize, String> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {:?}", value))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<u32>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| format!("invalid viewport dimension {:?}", part))
    };
    Ok(ViewportSize {
        width: parse(width)?,
        height: parse(height)?,
    })
}

/// Parse `LEFT,TOP,RIGHT,BOTTOM`.
pub fn parse_rect(value: &str) -> Result<Viewport, String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid rectangle {:?}: {}", value, e))?;

    match parts.as_slice() {
        [left, top, right, bottom] if left <= right && top <= bottom => {
            Ok(Viewport::new(*left, *top, *right, *bottom))
        }
        [_, _, _, _] => Err(format!("rectangle {:?} has negative extent", value)),
        _ => Err(format!("expected LEFT,TOP,RIGHT,BOTTOM, got {:?}", value)),
    }
}

// =============================================================================
// Tests
// =============================================================================
