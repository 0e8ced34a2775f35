//! Pyramid geometry integration tests.
//!
//! Tests verify:
//! - The reference 4096x2048 pyramid end to end from its descriptor
//! - Tile group layout across group boundaries
//! - Corner mapping on every layer for awkward image sizes
//! - Layer count stability at power-of-two boundaries

use zoomify_stream::pyramid::geometry::number_of_layers;
use zoomify_stream::pyramid::{ImageMetadata, Pyramid, Viewport};
use zoomify_stream::TilePosition;

use super::test_utils::{descriptor_xml, total_tiles};

fn pyramid(width: u32, height: u32, tile_size: u32) -> Pyramid {
    let metadata =
        ImageMetadata::from_descriptor(&descriptor_xml(width, height, tile_size), "test").unwrap();
    Pyramid::new(metadata)
}

#[test]
fn test_reference_pyramid_from_descriptor() {
    let pyramid = pyramid(4096, 2048, 256);

    assert_eq!(pyramid.layer_count(), 5);
    let first = pyramid.layer(0).unwrap();
    assert_eq!((first.tiles_horizontal, first.tiles_vertical), (1, 1));
    let last = pyramid.layer(4).unwrap();
    assert_eq!((last.tiles_horizontal, last.tiles_vertical), (16, 8));

    assert_eq!(
        pyramid.tile_coords_for_point(4, 4095.0, 2047.0).unwrap(),
        TilePosition::new(4, 15, 7)
    );
    assert_eq!(pyramid.total_tiles(), 171);
}

#[test]
fn test_tile_groups_of_large_pyramid() {
    // 1 + 4 + 16 + 64 + 256 + 1024 tiles
    let pyramid = pyramid(8192, 8192, 256);
    assert_eq!(pyramid.total_tiles(), 1365);

    let group = |layer, column, row| {
        pyramid
            .tile_group(&TilePosition::new(layer, column, row))
            .unwrap()
    };

    assert_eq!(group(0, 0, 0), 0);
    assert_eq!(group(4, 0, 0), 0);
    // 85 tiles below layer 4; index 10 + 10*16 = 170; 255 / 256 = 0
    assert_eq!(group(4, 10, 10), 0);
    assert_eq!(group(4, 11, 10), 1);
    assert_eq!(group(5, 0, 0), 1);
    assert_eq!(group(5, 31, 31), 5);

    // Groups never decrease in generation order
    let mut previous = 0;
    for layer in 0..pyramid.layer_count() {
        for position in pyramid.tiles_in_layer(layer).unwrap() {
            let current = pyramid.tile_group(&position).unwrap();
            assert!(current >= previous);
            assert_eq!(current, pyramid.tile_group(&position).unwrap());
            previous = current;
        }
    }
}

#[test]
fn test_every_group_holds_at_most_tile_size_tiles() {
    let pyramid = pyramid(8192, 8192, 256);
    let mut per_group = std::collections::HashMap::new();
    for layer in 0..pyramid.layer_count() {
        for position in pyramid.tiles_in_layer(layer).unwrap() {
            *per_group
                .entry(pyramid.tile_group(&position).unwrap())
                .or_insert(0u32) += 1;
        }
    }
    assert_eq!(per_group.len(), 6);
    assert!(per_group.values().all(|count| *count <= 256));
}

#[test]
fn test_corners_map_to_grid_corners_on_every_layer() {
    for (width, height, tile_size) in [
        (4096, 2048, 256),
        (1000, 700, 256),
        (513, 513, 256),
        (257, 3000, 256),
        (8193, 100, 256),
        (300, 200, 512),
    ] {
        let pyramid = pyramid(width, height, tile_size);
        let (right, bottom) = ((width - 1) as f64, (height - 1) as f64);

        for layer in 0..pyramid.layer_count() {
            let grid = pyramid.layer(layer).unwrap();
            let (last_column, last_row) = (grid.tiles_horizontal - 1, grid.tiles_vertical - 1);
            let coords = |x, y| {
                let position = pyramid.tile_coords_for_point(layer, x, y).unwrap();
                (position.column, position.row)
            };

            assert_eq!(coords(0.0, 0.0), (0, 0), "{}x{} layer {}", width, height, layer);
            assert_eq!(coords(right, 0.0), (last_column, 0));
            assert_eq!(coords(0.0, bottom), (0, last_row));
            assert_eq!(coords(right, bottom), (last_column, last_row));
        }
    }
}

#[test]
fn test_out_of_range_queries_fail_fast() {
    let pyramid = pyramid(4096, 2048, 256);

    assert!(pyramid.tile_coords_for_point(5, 0.0, 0.0).is_err());
    assert!(pyramid.tile_coords_for_point(4, 4096.0, 0.0).is_err());
    assert!(pyramid.tile_coords_for_point(4, 0.0, -1.0).is_err());
    assert!(pyramid.tile_group(&TilePosition::new(4, 16, 0)).is_err());
    assert!(pyramid.tile_area(&TilePosition::new(0, 1, 0)).is_err());
    assert!(pyramid.visible_tiles(9, &Viewport::full(4096, 2048)).is_err());
}

#[test]
fn test_layer_count_at_power_of_two_boundaries() {
    for exponent in 0..8 {
        let size = 256u32 << exponent;
        assert_eq!(number_of_layers(size, size, 256), exponent + 1, "size {}", size);
        assert_eq!(number_of_layers(size, 1, 256), exponent + 1);
    }
    assert_eq!(number_of_layers(257, 257, 256), 2);
    assert_eq!(number_of_layers(255, 255, 256), 1);
}

#[test]
fn test_tile_areas_partition_each_layer() {
    let pyramid = pyramid(1000, 700, 256);

    for layer in 0..pyramid.layer_count() {
        let covered: u64 = pyramid
            .tiles_in_layer(layer)
            .unwrap()
            .iter()
            .map(|position| {
                let area = pyramid.tile_area(position).unwrap();
                area.width() as u64 * area.height() as u64
            })
            .sum();
        assert_eq!(covered, 1000 * 700, "layer {}", layer);
    }
}

#[test]
fn test_visible_tiles_for_viewport() {
    let pyramid = pyramid(4096, 2048, 256);

    // Layer 3 tiles cover 512 full-resolution pixels
    let tiles = pyramid
        .visible_tiles(3, &Viewport::new(500.0, 0.0, 1100.0, 300.0))
        .unwrap();
    assert_eq!(
        tiles,
        vec![
            TilePosition::new(3, 0, 0),
            TilePosition::new(3, 1, 0),
            TilePosition::new(3, 2, 0),
        ]
    );

    let all = pyramid.visible_tiles(4, &Viewport::full(4096, 2048)).unwrap();
    assert_eq!(all.len(), 128);
    assert!(pyramid
        .visible_tiles(4, &Viewport::new(5000.0, 0.0, 6000.0, 10.0))
        .unwrap()
        .is_empty());
}

#[test]
fn test_descriptor_tile_count_helper_matches_pyramid() {
    for (width, height) in [(4096, 2048), (1000, 700), (8193, 100)] {
        assert_eq!(
            total_tiles(width, height, 256),
            pyramid(width, height, 256).total_tiles()
        );
    }
}
