//! zoomify-stream - inspect and prefetch Zoomify image pyramids.
//!
//! This binary drives the library the way a viewer would: load the
//! descriptor, pick the layer for a viewport, list or fetch its tiles.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use zoomify_stream::{
    config::{Cli, Command, InfoConfig, RuntimeOptions, TilesConfig},
    CacheManager, FetchOutcome, ImageManager, Pyramid, ReqwestTransport, TilePosition, Viewport,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Info(config) => run_info(config).await,
        Command::Tiles(config) => run_tiles(config).await,
        Command::Fetch(config) => run_fetch(config).await,
    }
}

// =============================================================================
// Shared Setup
// =============================================================================

/// Build a manager for `base_url` and load its descriptor.
async fn open_manager(
    base_url: &str,
    runtime: &RuntimeOptions,
) -> Result<ImageManager<ReqwestTransport>, String> {
    runtime.validate()?;

    let caches = Arc::new(CacheManager::open(&runtime.cache_config()));
    let transport = Arc::new(ReqwestTransport::new().map_err(|e| e.to_string())?);
    let mut manager = ImageManager::new(base_url, transport, caches, runtime.manager_config())
        .map_err(|e| e.to_string())?;

    match manager.load_metadata().await {
        FetchOutcome::Success(_) => Ok(manager),
        FetchOutcome::Failed(e) => Err(format!("{}: {}", e.kind().user_message(), e)),
        FetchOutcome::Cancelled => Err("metadata load cancelled".to_string()),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "zoomify_stream=debug"
    } else {
        "zoomify_stream=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_json(value: &serde_json::Value) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize output: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Info Command
// =============================================================================

async fn run_info(config: InfoConfig) -> ExitCode {
    init_logging(config.runtime.verbose);

    let mut manager = match open_manager(&config.base_url, &config.runtime).await {
        Ok(manager) => manager,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = match manager.pyramid() {
        Ok(pyramid) if config.json => print_json(&serde_json::json!({
            "base_url": manager.base_url(),
            "pyramid": pyramid,
            "total_tiles": pyramid.total_tiles(),
        })),
        Ok(pyramid) => {
            print_summary(manager.base_url(), pyramid);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    };

    manager.shutdown().await;
    code
}

fn print_summary(base_url: &str, pyramid: &Pyramid) {
    let metadata = pyramid.metadata();
    println!("Pyramid: {}", base_url);
    println!("═════════════════════════════════");
    println!("  Size:      {} x {}", metadata.width, metadata.height);
    println!("  Tile size: {}", metadata.tile_size);
    println!("  Version:   {}", metadata.version);
    println!(
        "  Tiles:     {} (descriptor says {})",
        pyramid.total_tiles(),
        metadata.tile_count
    );
    println!();
    println!("Layers:");
    for (index, layer) in pyramid.layers().iter().enumerate() {
        println!(
            "  {:>2}: {:>4} x {:<4} tiles",
            index, layer.tiles_horizontal, layer.tiles_vertical
        );
    }
}

// =============================================================================
// Tiles Command
// =============================================================================

/// Layer and visible tiles selected by `config`.
fn select_tiles(
    manager: &ImageManager<ReqwestTransport>,
    config: &TilesConfig,
) -> Result<(u32, Vec<TilePosition>), String> {
    let pyramid = manager.pyramid().map_err(|e| e.to_string())?;
    let layer = match config.layer {
        Some(layer) => layer,
        None => manager
            .best_layer(config.viewport.width as f64, config.viewport.height as f64)
            .map_err(|e| e.to_string())?,
    };
    let metadata = pyramid.metadata();
    let rect = config
        .rect
        .unwrap_or_else(|| Viewport::full(metadata.width, metadata.height));
    let tiles = manager
        .visible_tiles(layer, &rect)
        .map_err(|e| e.to_string())?;
    Ok((layer, tiles))
}

async fn run_tiles(config: TilesConfig) -> ExitCode {
    init_logging(config.runtime.verbose);

    let mut manager = match open_manager(&config.base_url, &config.runtime).await {
        Ok(manager) => manager,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = match list_tiles(&manager, &config) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    };

    manager.shutdown().await;
    code
}

fn list_tiles(
    manager: &ImageManager<ReqwestTransport>,
    config: &TilesConfig,
) -> Result<ExitCode, String> {
    let (layer, tiles) = select_tiles(manager, config)?;

    let mut rows = Vec::with_capacity(tiles.len());
    for position in &tiles {
        let url = manager.tile_url(position).map_err(|e| e.to_string())?;
        let area = manager.tile_area(position).map_err(|e| e.to_string())?;
        rows.push((position, url, area));
    }

    if config.json {
        let tiles: Vec<_> = rows
            .iter()
            .map(|(position, url, area)| {
                serde_json::json!({ "position": position, "url": url, "area": area })
            })
            .collect();
        return Ok(print_json(&serde_json::json!({
            "base_url": manager.base_url(),
            "layer": layer,
            "tiles": tiles,
        })));
    }

    println!("Layer {} ({} tiles)", layer, rows.len());
    for (position, url, area) in rows {
        println!(
            "  {:<12} [{},{} {}x{}]  {}",
            position.to_string(),
            area.left,
            area.top,
            area.width(),
            area.height(),
            url
        );
    }
    Ok(ExitCode::SUCCESS)
}

// =============================================================================
// Fetch Command
// =============================================================================

async fn run_fetch(config: TilesConfig) -> ExitCode {
    init_logging(config.runtime.verbose);

    let mut manager = match open_manager(&config.base_url, &config.runtime).await {
        Ok(manager) => manager,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let (layer, tiles) = match select_tiles(&manager, &config) {
        Ok(selection) => selection,
        Err(e) => {
            error!("{}", e);
            manager.shutdown().await;
            return ExitCode::FAILURE;
        }
    };

    manager.update_visible_tile_count(tiles.len());
    info!(layer, tiles = tiles.len(), "Fetching visible tiles");

    let results = match manager.fetch_tiles(&tiles).await {
        Ok(results) => results,
        Err(e) => {
            error!("{}", e);
            manager.shutdown().await;
            return ExitCode::FAILURE;
        }
    };

    let summary = FetchSummary::from_outcomes(&results);
    let mut reports = Vec::with_capacity(results.len());
    for (position, outcome) in &results {
        let status = match outcome {
            FetchOutcome::Success(bitmap) => format!("ok {}x{}", bitmap.width(), bitmap.height()),
            FetchOutcome::Failed(e) => {
                warn!(tile = %position, error = %e, "Tile failed");
                format!("failed: {}", e.kind().user_message())
            }
            FetchOutcome::Cancelled => "cancelled".to_string(),
        };
        reports.push((position, status));
    }

    let code = if config.json {
        let tiles: Vec<_> = reports
            .iter()
            .map(|(position, status)| serde_json::json!({ "position": position, "status": status }))
            .collect();
        print_json(&serde_json::json!({
            "base_url": manager.base_url(),
            "layer": layer,
            "fetched": summary.fetched,
            "failed": summary.failed,
            "cancelled": summary.cancelled,
            "tiles": tiles,
        }))
    } else {
        for (position, status) in &reports {
            println!("  {:<12} {}", position.to_string(), status);
        }
        println!();
        println!(
            "{} fetched, {} failed, {} cancelled",
            summary.fetched, summary.failed, summary.cancelled
        );
        ExitCode::SUCCESS
    };

    manager.shutdown().await;
    if summary.failed > 0 {
        ExitCode::FAILURE
    } else {
        code
    }
}

/// Per-outcome tile counts of a fetch run.
#[derive(Debug, Default, PartialEq, Eq)]
struct FetchSummary {
    fetched: usize,
    failed: usize,
    cancelled: usize,
}

impl FetchSummary {
    fn from_outcomes<T>(results: &[(TilePosition, FetchOutcome<T>)]) -> Self {
        let mut summary = Self::default();
        for (_, outcome) in results {
            match outcome {
                FetchOutcome::Success(_) => summary.fetched += 1,
                FetchOutcome::Failed(_) => summary.failed += 1,
                FetchOutcome::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}
