use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use url::Url;

use crate::error::{FetchError, TransportError};

/// Status codes treated as redirects. 308 is deliberately absent.
pub const REDIRECT_CODES: [u16; 6] = [300, 301, 302, 303, 305, 307];

/// Single HTTP response as seen by the redirect state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,

    /// `Location` header, if any
    pub location: Option<String>,

    pub body: Bytes,
}

impl HttpResponse {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            location: None,
            body: body.into(),
        }
    }

    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self {
            status,
            location: Some(location.into()),
            body: Bytes::new(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            location: None,
            body: Bytes::new(),
        }
    }
}

/// Issues one HTTP GET without following redirects.
///
/// Redirects are resolved by [`get_following_redirects`] because a 301 on the
/// descriptor has to be reported to the caller.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError>;
}

// =============================================================================
// reqwest Transport
// =============================================================================

/// [`HttpTransport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client with automatic redirects disabled.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("zoomify-stream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError> {
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout(timeout)
            } else {
                TransportError::Connection(e.to_string())
            }
        };

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_err)?;

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(map_err)?;

        Ok(HttpResponse {
            status,
            location,
            body,
        })
    }
}

// =============================================================================
// Redirect State Machine
// =============================================================================

/// Body of a successful fetch plus the redirect trail that led to it.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: Bytes,

    /// URL that finally answered with 2xx
    pub final_url: String,

    /// Target of the last 301 on the way, if any
    pub permanent_location: Option<String>,
}

/// GET `url`, following redirects by hand.
///
/// At most `max_requests` requests are issued; a redirect on the last one
/// fails with [`FetchError::TooManyRedirections`].
pub async fn get_following_redirects<T: HttpTransport + ?Sized>(
    transport: &T,
    url: &str,
    timeout: Duration,
    max_requests: u32,
) -> Result<Fetched, FetchError> {
    let mut current = url.to_string();
    let mut permanent_location = None;

    for _ in 0..max_requests {
        let response =
            transport
                .get(&current, timeout)
                .await
                .map_err(|e| FetchError::Transfer {
                    url: current.clone(),
                    message: e.to_string(),
                })?;

        match response.status {
            200..=299 => {
                return Ok(Fetched {
                    body: response.body,
                    final_url: current,
                    permanent_location,
                })
            }
            code if REDIRECT_CODES.contains(&code) => {
                let target = response
                    .location
                    .as_deref()
                    .map(str::trim)
                    .filter(|location| !location.is_empty())
                    .and_then(|location| resolve_location(&current, location))
                    .ok_or_else(|| FetchError::ServerResponse {
                        url: current.clone(),
                        code,
                    })?;

                debug!(from = %current, to = %target, code, "Following redirect");
                if code == 301 {
                    permanent_location = Some(target.clone());
                }
                current = target;
            }
            code => {
                return Err(FetchError::ServerResponse { url: current, code });
            }
        }
    }

    Err(FetchError::TooManyRedirections {
        url: current,
        limit: max_requests,
    })
}

/// Resolve a `Location` header against the URL that returned it.
fn resolve_location(current: &str, location: &str) -> Option<String> {
    match Url::parse(location) {
        Ok(absolute) => Some(absolute.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(current)
            .and_then(|base| base.join(location))
            .map(|joined| joined.to_string())
            .ok(),
        Err(_) => None,
    }
}

/// Append the trailing slash base URLs are expected to carry.
pub fn normalize_base_url(base_url: &str) -> String {
    let trimmed = base_url.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}
