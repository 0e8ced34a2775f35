//! Test utilities for integration tests.
//!
//! This module provides a scripted in-memory Zoomify server implementing
//! [`HttpTransport`], plus helpers for descriptors and JPEG tiles.

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use zoomify_stream::error::TransportError;
use zoomify_stream::pyramid::geometry::{layer_tile_grid, number_of_layers};
use zoomify_stream::{CacheConfig, CacheManager, HttpResponse, HttpTransport, ImageManager, ManagerConfig};

// =============================================================================
// Descriptor and Tile Helpers
// =============================================================================

/// Total tile count of a pyramid, as a generator would announce it.
pub fn total_tiles(width: u32, height: u32, tile_size: u32) -> u64 {
    let layers = number_of_layers(width, height, tile_size);
    (0..layers)
        .map(|layer| {
            let (columns, rows) = layer_tile_grid(layer, layers, width, height, tile_size);
            columns as u64 * rows as u64
        })
        .sum()
}

/// An `ImageProperties.xml` document for the given geometry.
pub fn descriptor_xml(width: u32, height: u32, tile_size: u32) -> String {
    format!(
        r#"<IMAGE_PROPERTIES WIDTH="{}" HEIGHT="{}" NUMTILES="{}" NUMIMAGES="1" VERSION="1.8" TILESIZE="{}" />"#,
        width,
        height,
        total_tiles(width, height, tile_size),
        tile_size
    )
}

/// Encode a solid-color RGB JPEG.
pub fn jpeg_tile(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, 90);
    encoder
        .encode(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
    buf
}

// =============================================================================
// Mock Zoomify Server
// =============================================================================

#[derive(Clone)]
enum Route {
    Body(Bytes),
    Redirect(u16, String),
    Status(u16),
    Fail,
}

/// Scripted HTTP server.
///
/// Exact URLs map to bodies, redirects or status codes. Any `.jpg` below a
/// registered tile prefix is answered with a small JPEG. Every request is
/// recorded, and an optional gate holds responses until released.
pub struct MockZoomifyServer {
    routes: Mutex<HashMap<String, Route>>,
    tile_prefixes: Mutex<Vec<String>>,
    tile_body: Bytes,
    request_count: AtomicUsize,
    requests: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
}

impl MockZoomifyServer {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            tile_prefixes: Mutex::new(Vec::new()),
            tile_body: Bytes::from(jpeg_tile(16, 16, [40, 120, 200])),
            request_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    fn route(self, url: &str, route: Route) -> Self {
        self.routes.lock().unwrap().insert(url.to_string(), route);
        self
    }

    /// Serve a descriptor at `<base>ImageProperties.xml`.
    pub fn with_pyramid(self, base: &str, width: u32, height: u32, tile_size: u32) -> Self {
        let url = format!("{}ImageProperties.xml", base);
        self.with_body(&url, descriptor_xml(width, height, tile_size))
            .with_tiles(base)
    }

    /// Answer every `.jpg` below `base` with a tile.
    pub fn with_tiles(self, base: &str) -> Self {
        self.tile_prefixes.lock().unwrap().push(base.to_string());
        self
    }

    pub fn with_body(self, url: &str, body: impl Into<Bytes>) -> Self {
        self.route(url, Route::Body(body.into()))
    }

    pub fn with_redirect(self, url: &str, status: u16, location: &str) -> Self {
        self.route(url, Route::Redirect(status, location.to_string()))
    }

    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.route(url, Route::Status(status))
    }

    /// Fail requests for `url` at the transport level.
    pub fn with_transport_failure(self, url: &str) -> Self {
        self.route(url, Route::Fail)
    }

    /// Hold every response until [`release`](Self::release) adds permits.
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Let `count` held responses through.
    pub fn release(&self, count: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(count);
        }
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests for URLs ending in `.jpg`.
    pub fn tile_request_count(&self) -> usize {
        self.requests()
            .iter()
            .filter(|url| url.ends_with(".jpg"))
            .count()
    }

    fn respond(&self, url: &str) -> Result<HttpResponse, TransportError> {
        if let Some(route) = self.routes.lock().unwrap().get(url).cloned() {
            return match route {
                Route::Body(body) => Ok(HttpResponse::ok(body)),
                Route::Redirect(status, location) => Ok(HttpResponse::redirect(status, location)),
                Route::Status(status) => Ok(HttpResponse::status(status)),
                Route::Fail => Err(TransportError::Connection("connection reset".to_string())),
            };
        }

        let is_tile = url.ends_with(".jpg")
            && self
                .tile_prefixes
                .lock()
                .unwrap()
                .iter()
                .any(|prefix| url.starts_with(prefix.as_str()));
        if is_tile {
            Ok(HttpResponse::ok(self.tile_body.clone()))
        } else {
            Ok(HttpResponse::status(404))
        }
    }
}

impl Default for MockZoomifyServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for MockZoomifyServer {
    async fn get(&self, url: &str, _timeout: Duration) -> Result<HttpResponse, TransportError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(url.to_string());

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| TransportError::Connection("server closed".to_string()))?;
            permit.forget();
        }

        self.respond(url)
    }
}

// =============================================================================
// Manager Helpers
// =============================================================================

/// Memory-only caches, so tests never touch the user's cache directory.
pub fn memory_caches() -> Arc<CacheManager> {
    Arc::new(CacheManager::open(&CacheConfig::memory_only()))
}

/// Manager over `server` with default policy and memory-only caches.
pub fn manager_for(
    base: &str,
    server: &Arc<MockZoomifyServer>,
) -> ImageManager<MockZoomifyServer> {
    ImageManager::new(
        base,
        Arc::clone(server),
        memory_caches(),
        ManagerConfig::default(),
    )
    .unwrap()
}
