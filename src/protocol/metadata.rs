use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::http::{get_following_redirects, normalize_base_url, HttpTransport};
use crate::error::FetchError;
use crate::pyramid::DESCRIPTOR_FILENAME;

/// Raw descriptor document as downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorDocument {
    /// Descriptor XML text
    pub document: String,

    /// URL the descriptor was requested from
    pub url: String,

    /// New base URL when the descriptor request was permanently redirected
    pub canonical_base_url: Option<String>,
}

/// Downloads `ImageProperties.xml` for a pyramid.
///
/// No caching happens here; see [`MetadataCache`](crate::cache::MetadataCache).
pub struct MetadataClient<T: ?Sized> {
    transport: Arc<T>,
    timeout: Duration,
    max_redirections: u32,
}

impl<T: HttpTransport + ?Sized> MetadataClient<T> {
    pub fn new(transport: Arc<T>, timeout: Duration, max_redirections: u32) -> Self {
        Self {
            transport,
            timeout,
            max_redirections,
        }
    }

    /// Fetch the descriptor document of the pyramid at `base_url`.
    pub async fn fetch(&self, base_url: &str) -> Result<DescriptorDocument, FetchError> {
        let url = descriptor_url(base_url);
        debug!(%url, "Fetching pyramid descriptor");

        let fetched =
            get_following_redirects(self.transport.as_ref(), &url, self.timeout, self.max_redirections)
                .await?;

        let document = String::from_utf8(fetched.body.to_vec()).map_err(|e| {
            FetchError::InvalidData {
                url: fetched.final_url.clone(),
                message: format!("descriptor is not UTF-8: {}", e),
            }
        })?;

        let canonical_base_url = fetched.permanent_location.as_deref().map(base_of);
        if let Some(ref canonical) = canonical_base_url {
            info!(old = %base_url, new = %canonical, "Pyramid moved permanently");
        }

        Ok(DescriptorDocument {
            document,
            url,
            canonical_base_url,
        })
    }
}

/// URL of the descriptor below `base_url`.
pub fn descriptor_url(base_url: &str) -> String {
    format!("{}{}", normalize_base_url(base_url), DESCRIPTOR_FILENAME)
}

/// Base URL of a redirected descriptor location.
///
/// Strips the descriptor file name, or the last path segment when the server
/// renamed it.
fn base_of(location: &str) -> String {
    match location.strip_suffix(DESCRIPTOR_FILENAME) {
        Some(base) => normalize_base_url(base),
        None => match location.rfind('/') {
            Some(index) => location[..=index].to_string(),
            None => normalize_base_url(location),
        },
    }
}
