use std::fmt;

use serde::Serialize;

/// Address of one tile in a Zoomify pyramid.
///
/// Used as a registry key, so it compares and hashes by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TilePosition {
    /// Pyramid layer (0 = single-tile overview)
    pub layer: u32,

    /// Tile column (0-indexed from left)
    pub column: u32,

    /// Tile row (0-indexed from top)
    pub row: u32,
}

impl TilePosition {
    pub fn new(layer: u32, column: u32, row: u32) -> Self {
        Self { layer, column, row }
    }

    /// File name of this tile inside its tile group directory.
    pub fn file_name(&self) -> String {
        format!("{}.jpg", self)
    }
}

impl fmt::Display for TilePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.layer, self.column, self.row)
    }
}
