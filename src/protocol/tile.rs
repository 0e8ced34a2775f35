use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::http::{get_following_redirects, normalize_base_url, HttpTransport};
use crate::error::FetchError;
use crate::tile::{Bitmap, TileCodec, TilePosition};

/// Build the URL of a tile: `<base>/TileGroup<N>/<layer>-<column>-<row>.jpg`.
pub fn tile_url(base_url: &str, tile_group: u32, position: &TilePosition) -> String {
    format!(
        "{}TileGroup{}/{}",
        normalize_base_url(base_url),
        tile_group,
        position.file_name()
    )
}

/// Downloads and decodes single tiles.
pub struct TileClient<T: ?Sized> {
    transport: Arc<T>,
    codec: Arc<dyn TileCodec>,
    timeout: Duration,
    max_redirections: u32,
}

impl<T: HttpTransport + ?Sized> TileClient<T> {
    pub fn new(
        transport: Arc<T>,
        codec: Arc<dyn TileCodec>,
        timeout: Duration,
        max_redirections: u32,
    ) -> Self {
        Self {
            transport,
            codec,
            timeout,
            max_redirections,
        }
    }

    /// Fetch the tile at `url` and decode it.
    ///
    /// A 2xx body that does not decode is reported as
    /// [`FetchError::InvalidData`].
    pub async fn fetch(&self, url: &str) -> Result<Bitmap, FetchError> {
        let fetched =
            get_following_redirects(self.transport.as_ref(), url, self.timeout, self.max_redirections)
                .await?;
        debug!(%url, bytes = fetched.body.len(), "Tile downloaded");

        let codec = Arc::clone(&self.codec);
        let body = fetched.body;
        let decoded = tokio::task::spawn_blocking(move || codec.decode(&body))
            .await
            .map_err(|e| FetchError::InvalidData {
                url: url.to_string(),
                message: format!("decoder task failed: {}", e),
            })?;

        decoded.map_err(|e| FetchError::InvalidData {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}
