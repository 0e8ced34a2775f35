use std::time::Duration;

use thiserror::Error;

/// Errors delivered by the metadata and tile protocol clients.
///
/// Every variant carries the URL of the request that failed. These are
/// captured inside fetch tasks and handed to listeners as values; they never
/// cross the async boundary as panics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Redirect hop budget exhausted, most likely a redirect loop
    #[error("Too many redirections ({limit}) while fetching {url}")]
    TooManyRedirections { url: String, limit: u32 },

    /// Unhandled HTTP status, or a redirect without a usable Location
    #[error("Unhandled server response {code} for {url}")]
    ServerResponse { url: String, code: u16 },

    /// The body arrived but could not be parsed or decoded
    #[error("Invalid data from {url}: {message}")]
    InvalidData { url: String, message: String },

    /// Timeout, DNS failure, connection reset and similar I/O failures
    #[error("Data transfer error for {url}: {message}")]
    Transfer { url: String, message: String },
}

impl FetchError {
    /// URL of the request that produced this error.
    pub fn url(&self) -> &str {
        match self {
            FetchError::TooManyRedirections { url, .. }
            | FetchError::ServerResponse { url, .. }
            | FetchError::InvalidData { url, .. }
            | FetchError::Transfer { url, .. } => url,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::TooManyRedirections { .. } => ErrorKind::RedirectLoop,
            FetchError::ServerResponse { .. } => ErrorKind::ServerResponse,
            FetchError::InvalidData { .. } => ErrorKind::InvalidData,
            FetchError::Transfer { .. } => ErrorKind::Transfer,
        }
    }

    /// Whether re-enqueueing the same request may succeed.
    ///
    /// Only transport failures are transient; the other kinds describe what
    /// the server actually answered.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transfer { .. })
    }
}

/// Coarse classification of [`FetchError`] for user-facing diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ServerResponse,
    RedirectLoop,
    InvalidData,
    Transfer,
}

impl ErrorKind {
    /// Human-readable message category for this kind of failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::ServerResponse => "cannot process server resource",
            ErrorKind::RedirectLoop => "redirection loop",
            ErrorKind::InvalidData => "invalid content",
            ErrorKind::Transfer => "data transfer error",
        }
    }
}

/// Caller contract violations.
///
/// These indicate misuse of the geometry or manager API and are not meant to
/// be retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidArgument {
    /// Layer index outside `[0, layers)`
    #[error("Layer {layer} out of range (pyramid has {layers} layers)")]
    LayerOutOfRange { layer: u32, layers: u32 },

    /// Pixel outside `[0, width) x [0, height)`
    #[error("Point ({x}, {y}) outside image of {width}x{height}")]
    PointOutOfRange {
        x: f64,
        y: f64,
        width: u32,
        height: u32,
    },

    /// Tile column/row outside its layer grid
    #[error("Tile {column}-{row} out of range for layer {layer} ({columns}x{rows} tiles)")]
    TileOutOfRange {
        layer: u32,
        column: u32,
        row: u32,
        columns: u32,
        rows: u32,
    },

    /// px/dp mixing ratio outside `[0, 1]`
    #[error("Pixel ratio must be within [0, 1], got {0}")]
    PxRatio(f64),

    /// Display density must be strictly positive
    #[error("Display density must be positive, got {0}")]
    Density(f64),

    /// Geometry query issued before the descriptor was loaded
    #[error("Image manager for {base_url} used before metadata was loaded")]
    NotInitialized { base_url: String },

    #[error("Base URL must not be empty")]
    EmptyBaseUrl,
}

/// Failures reported by an [`HttpTransport`](crate::protocol::HttpTransport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// The attempt exceeded its per-request timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors raised by a [`TileCodec`](crate::tile::TileCodec).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Failed to decode tile image: {message}")]
    Decode { message: String },

    #[error("Failed to encode tile image: {message}")]
    Encode { message: String },
}

/// Errors from the on-disk key/blob store.
///
/// None of these reach callers of the caches: a failing disk tier is disabled
/// and the caches keep working from memory.
#[derive(Debug, Error)]
pub enum DiskCacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The journal contains a record that cannot be interpreted
    #[error("Corrupt journal at line {line}: {reason}")]
    CorruptJournal { line: usize, reason: String },

    /// The disk tier was disabled or never came up
    #[error("Disk cache unavailable")]
    Unavailable,
}
