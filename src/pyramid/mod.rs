//! Zoomify pyramid model.
//!
//! A [`Pyramid`] bundles the parsed [`ImageMetadata`] with its derived
//! [`Layer`] grids and answers every geometric question the viewer asks:
//! which tile covers a pixel, which tile group directory a tile lives in,
//! which image area a tile covers, which layer suits a viewport and which
//! tiles a viewport shows.
//!
//! # Layer numbering
//!
//! ```text
//! layer 0      ┌──┐                      1 tile, whole image downscaled
//! layer 1      ┌──┬──┐                   2^(N-2) downscale
//!   ...        ...
//! layer N-1    ┌──┬──┬──┬──┬──┬──┬──┐    full resolution
//! ```

pub mod geometry;
mod layer;
mod metadata;

pub use geometry::{Rect, Viewport};
pub use layer::{compute_layers, Layer};
pub use metadata::{ImageMetadata, DESCRIPTOR_FILENAME};

use serde::Serialize;
use tracing::warn;

use crate::error::InvalidArgument;
use crate::tile::TilePosition;

/// Metadata plus derived layer structure of one pyramid.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pyramid {
    metadata: ImageMetadata,
    layers: Vec<Layer>,
}

impl Pyramid {
    /// Derive the layer structure from parsed metadata.
    ///
    /// The advertised tile count is only cross-checked; a mismatch is logged.
    pub fn new(metadata: ImageMetadata) -> Self {
        let layers = compute_layers(&metadata);
        let pyramid = Self { metadata, layers };

        let computed = pyramid.total_tiles();
        if computed != pyramid.metadata.tile_count as u64 {
            warn!(
                advertised = pyramid.metadata.tile_count,
                computed, "Descriptor tile count does not match computed layer grids"
            );
        }

        pyramid
    }

    pub fn metadata(&self) -> &ImageMetadata {
        &self.metadata
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer_count(&self) -> u32 {
        self.layers.len() as u32
    }

    /// Get one layer, validating the index.
    pub fn layer(&self, layer: u32) -> Result<&Layer, InvalidArgument> {
        self.layers
            .get(layer as usize)
            .ok_or(InvalidArgument::LayerOutOfRange {
                layer,
                layers: self.layer_count(),
            })
    }

    /// Total number of tiles over all layers.
    pub fn total_tiles(&self) -> u64 {
        self.layers.iter().map(Layer::tile_count).sum()
    }

    /// Tile of `layer` covering the full-resolution pixel `(x, y)`.
    ///
    /// The result is clamped into the layer grid: when halving floors a
    /// layer's extent below the last pixel, that pixel still maps to the
    /// last column/row.
    pub fn tile_coords_for_point(
        &self,
        layer: u32,
        x: f64,
        y: f64,
    ) -> Result<TilePosition, InvalidArgument> {
        let grid = *self.layer(layer)?;
        let (width, height) = (self.metadata.width, self.metadata.height);
        let inside = |value: f64, extent: u32| value >= 0.0 && value < extent as f64;
        if !inside(x, width) || !inside(y, height) {
            return Err(InvalidArgument::PointOutOfRange {
                x,
                y,
                width,
                height,
            });
        }

        let (column, row) = geometry::tile_coords_for_point(
            layer,
            x,
            y,
            self.layer_count(),
            self.metadata.tile_size,
        );
        Ok(TilePosition::new(
            layer,
            column.min(grid.tiles_horizontal - 1),
            row.min(grid.tiles_vertical - 1),
        ))
    }

    fn check_position(&self, position: &TilePosition) -> Result<&Layer, InvalidArgument> {
        let grid = self.layer(position.layer)?;
        if position.column >= grid.tiles_horizontal || position.row >= grid.tiles_vertical {
            return Err(InvalidArgument::TileOutOfRange {
                layer: position.layer,
                column: position.column,
                row: position.row,
                columns: grid.tiles_horizontal,
                rows: grid.tiles_vertical,
            });
        }
        Ok(grid)
    }

    /// Tile group directory holding `position`.
    ///
    /// Tiles are numbered in layer order, row-major within a layer, and every
    /// `tile_size` consecutive tiles share one `TileGroup<N>` directory.
    pub fn tile_group(&self, position: &TilePosition) -> Result<u32, InvalidArgument> {
        let grid = self.check_position(position)?;

        let tiles_below: u64 = self.layers[..position.layer as usize]
            .iter()
            .map(Layer::tile_count)
            .sum();
        let index_in_layer =
            position.column as u64 + position.row as u64 * grid.tiles_horizontal as u64;

        Ok(((tiles_below + index_in_layer) / self.metadata.tile_size as u64) as u32)
    }

    /// Area of the full-resolution image covered by `position`.
    ///
    /// Tiles in the last column/row are clipped to the image border.
    pub fn tile_area(&self, position: &TilePosition) -> Result<Rect, InvalidArgument> {
        let grid = self.check_position(position)?;
        let basic = self.metadata.tile_size as u64
            * geometry::scale_divisor(position.layer, self.layer_count());

        let extent = |index: u32, count: u32, full: u32| -> (u64, u64) {
            let start = basic * index as u64;
            let length = if index == count - 1 {
                full as u64 - basic * (count as u64 - 1)
            } else {
                basic
            };
            (start, start + length)
        };

        let (left, right) = extent(
            position.column,
            grid.tiles_horizontal,
            self.metadata.width,
        );
        let (top, bottom) = extent(position.row, grid.tiles_vertical, self.metadata.height);

        Ok(Rect {
            left: left as u32,
            top: top as u32,
            right: right as u32,
            bottom: bottom as u32,
        })
    }

    /// Shallowest layer at least as large as the viewport, in pixels.
    pub fn best_layer_for_viewport(&self, viewport_width: f64, viewport_height: f64) -> u32 {
        geometry::best_layer_for_viewport(
            viewport_width,
            viewport_height,
            self.layer_count(),
            self.metadata.width,
            self.metadata.height,
        )
    }

    /// Tiles of `layer` intersecting `viewport`, row by row.
    ///
    /// The viewport is clamped to the image first; a viewport entirely
    /// outside the image yields no tiles.
    pub fn visible_tiles(
        &self,
        layer: u32,
        viewport: &Viewport,
    ) -> Result<Vec<TilePosition>, InvalidArgument> {
        self.layer(layer)?;

        let max_x = (self.metadata.width - 1) as f64;
        let max_y = (self.metadata.height - 1) as f64;
        if viewport.right < viewport.left
            || viewport.bottom < viewport.top
            || viewport.right < 0.0
            || viewport.bottom < 0.0
            || viewport.left > max_x
            || viewport.top > max_y
        {
            return Ok(Vec::new());
        }

        let first = self.tile_coords_for_point(
            layer,
            viewport.left.clamp(0.0, max_x),
            viewport.top.clamp(0.0, max_y),
        )?;
        let last = self.tile_coords_for_point(
            layer,
            viewport.right.clamp(0.0, max_x),
            viewport.bottom.clamp(0.0, max_y),
        )?;

        let mut tiles = Vec::with_capacity(
            ((last.column - first.column + 1) * (last.row - first.row + 1)) as usize,
        );
        for row in first.row..=last.row {
            for column in first.column..=last.column {
                tiles.push(TilePosition::new(layer, column, row));
            }
        }
        Ok(tiles)
    }

    /// Every tile of `layer`, row by row.
    pub fn tiles_in_layer(&self, layer: u32) -> Result<Vec<TilePosition>, InvalidArgument> {
        let grid = *self.layer(layer)?;
        Ok((0..grid.tiles_vertical)
            .flat_map(|row| {
                (0..grid.tiles_horizontal).map(move |column| TilePosition::new(layer, column, row))
            })
            .collect())
    }
}

// =============================================================================
// Tests
// =============================================================================
