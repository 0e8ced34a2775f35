//! Zoomify descriptor (`ImageProperties.xml`) parsing.
//!
//! The descriptor is a single self-closing element:
//!
//! ```xml
//! <IMAGE_PROPERTIES WIDTH="4096" HEIGHT="2048" NUMTILES="171"
//!                   NUMIMAGES="1" VERSION="1.8" TILESIZE="256" />
//! ```
//!
//! Only the root element and its attributes matter. Missing or malformed
//! attributes are rejected, never defaulted.

use roxmltree::{Document, ParsingOptions};
use serde::Serialize;

use crate::error::FetchError;

/// File name of the descriptor below a pyramid's base URL.
pub const DESCRIPTOR_FILENAME: &str = "ImageProperties.xml";

/// Name of the descriptor's root element.
const ROOT_ELEMENT: &str = "IMAGE_PROPERTIES";

/// Immutable description of a Zoomify pyramid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageMetadata {
    /// Full-resolution width in pixels
    pub width: u32,

    /// Full-resolution height in pixels
    pub height: u32,

    /// Edge length of a square tile in pixels
    pub tile_size: u32,

    /// Tile count announced by the server; informational only
    pub tile_count: u32,

    /// Image count announced by the server; informational only
    pub image_count: u32,

    /// Descriptor format version string
    pub version: String,
}

impl ImageMetadata {
    /// Parse a descriptor document.
    ///
    /// `source_url` only labels the error.
    pub fn from_descriptor(document: &str, source_url: &str) -> Result<Self, FetchError> {
        let invalid = |message: String| FetchError::InvalidData {
            url: source_url.to_string(),
            message,
        };

        // Generators may emit a byte order mark and a DOCTYPE
        let document = document.trim_start_matches('\u{feff}');
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        let parsed = Document::parse_with_options(document, options)
            .map_err(|e| invalid(format!("malformed XML: {}", e)))?;

        let root = parsed.root_element();
        let name = root.tag_name().name();
        if name != ROOT_ELEMENT {
            return Err(invalid(format!(
                "expected <{}> root element, found <{}>",
                ROOT_ELEMENT, name
            )));
        }

        let integer = |key: &str| -> Result<u32, FetchError> {
            let raw = root
                .attribute(key)
                .ok_or_else(|| invalid(format!("missing {} attribute", key)))?;
            raw.trim()
                .parse::<u32>()
                .map_err(|_| invalid(format!("{} is not an integer: {:?}", key, raw)))
        };

        let width = integer("WIDTH")?;
        let height = integer("HEIGHT")?;
        let tile_size = integer("TILESIZE")?;
        let tile_count = integer("NUMTILES")?;
        let image_count = integer("NUMIMAGES")?;
        let version = root
            .attribute("VERSION")
            .ok_or_else(|| invalid("missing VERSION attribute".to_string()))?
            .to_string();

        if width == 0 || height == 0 || tile_size == 0 {
            return Err(invalid(format!(
                "dimensions must be positive (width={}, height={}, tile size={})",
                width, height, tile_size
            )));
        }

        Ok(Self {
            width,
            height,
            tile_size,
            tile_count,
            image_count,
            version,
        })
    }
}
