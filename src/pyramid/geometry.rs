//! Zoomify pyramid arithmetic.
//!
//! Layers are numbered from 0 (the whole image reduced to a single tile) to
//! N-1 (full resolution). Layer `L` is the full image downscaled by
//! `2^(N-L-1)`.
//!
//! All functions here are pure and operate on plain integers so they can be
//! tested against reference pyramids without any I/O.

use serde::Serialize;

/// Number of decimals kept before taking the ceiling in [`number_of_layers`].
const LAYER_ROUNDING_DECIMALS: i32 = 3;

/// Calculate the number of layers of a Zoomify pyramid.
///
/// The tile count along the longest side is halved until it fits a single
/// tile. Each ratio is rounded to three decimals before the ceiling is taken,
/// so float noise such as `16.000000001` cannot produce a phantom layer.
pub fn number_of_layers(width: u32, height: u32, tile_size: u32) -> u32 {
    let max_dim = width.max(height);
    if max_dim == 0 || tile_size == 0 {
        return 1;
    }

    let max_dim = max_dim as f64;
    let tile_size = tile_size as f64;
    let mut layers: u32 = 0;
    loop {
        let tiles = max_dim / (tile_size * 2f64.powi(layers as i32));
        layers += 1;
        if round_half_up(tiles, LAYER_ROUNDING_DECIMALS).ceil() <= 1.0 {
            return layers;
        }
    }
}

/// Round a non-negative value to `decimals` places, halves going up.
fn round_half_up(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Downscale factor of `layer` relative to the full-resolution image.
///
/// `layer` must be below `layers`.
#[inline]
pub fn scale_divisor(layer: u32, layers: u32) -> u64 {
    debug_assert!(layer < layers);
    1u64 << (layers - layer - 1)
}

/// Calculate the tile grid `(columns, rows)` of a layer.
///
/// Grid size is `ceil(floor(dimension / divisor) / tile_size)`, never less
/// than one tile so that layer 0 is always a single tile even for extreme
/// aspect ratios.
pub fn layer_tile_grid(
    layer: u32,
    layers: u32,
    width: u32,
    height: u32,
    tile_size: u32,
) -> (u32, u32) {
    let divisor = scale_divisor(layer, layers);
    let tile_size = tile_size as u64;
    let columns = (width as u64 / divisor).div_ceil(tile_size).max(1);
    let rows = (height as u64 / divisor).div_ceil(tile_size).max(1);
    (columns as u32, rows as u32)
}

/// Map a full-resolution pixel to the tile covering it in `layer`.
///
/// Layer 0 always answers `(0, 0)`. No range checking happens here; see
/// [`Pyramid::tile_coords_for_point`](super::Pyramid::tile_coords_for_point)
/// for the validated, grid-clamped variant.
pub fn tile_coords_for_point(
    layer: u32,
    x: f64,
    y: f64,
    layers: u32,
    tile_size: u32,
) -> (u32, u32) {
    if layer == 0 {
        return (0, 0);
    }
    let step = tile_size as f64 * scale_divisor(layer, layers) as f64;
    ((x / step).floor() as u32, (y / step).floor() as u32)
}

/// Pick the shallowest layer whose extent covers the viewport.
///
/// Falls back to the deepest layer when even full resolution is smaller than
/// the viewport.
pub fn best_layer_for_viewport(
    viewport_width: f64,
    viewport_height: f64,
    layers: u32,
    width: u32,
    height: u32,
) -> u32 {
    for layer in 0..layers {
        let divisor = scale_divisor(layer, layers) as f64;
        if width as f64 / divisor >= viewport_width && height as f64 / divisor >= viewport_height {
            return layer;
        }
    }
    layers.saturating_sub(1)
}

// =============================================================================
// Rectangles
// =============================================================================

/// Integer rectangle in full-resolution image pixels, right/bottom exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Rect {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// Visible area in full-resolution image coordinates.
///
/// May extend past the image or be partially negative when the view is
/// panned beyond the image edges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Viewport {
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Viewport covering a whole `width` x `height` image.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f64, height as f64)
    }
}

// =============================================================================
// Tests
// =============================================================================
