use serde::Serialize;

use super::geometry::{layer_tile_grid, number_of_layers};
use super::metadata::ImageMetadata;

/// Tile grid of one pyramid resolution level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Layer {
    pub tiles_horizontal: u32,
    pub tiles_vertical: u32,
}

impl Layer {
    /// Number of tiles in this layer.
    pub fn tile_count(&self) -> u64 {
        self.tiles_horizontal as u64 * self.tiles_vertical as u64
    }
}

/// Compute the layer sequence of a pyramid, smallest layer first.
pub fn compute_layers(metadata: &ImageMetadata) -> Vec<Layer> {
    let layers = number_of_layers(metadata.width, metadata.height, metadata.tile_size);
    (0..layers)
        .map(|layer| {
            let (tiles_horizontal, tiles_vertical) = layer_tile_grid(
                layer,
                layers,
                metadata.width,
                metadata.height,
                metadata.tile_size,
            );
            Layer {
                tiles_horizontal,
                tiles_vertical,
            }
        })
        .collect()
}
