//! Zoomify HTTP protocol.
//!
//! Both clients share one redirect state machine:
//!
//! ```text
//! Start ──► Requesting ──2xx──────────────► Success
//!              │  ▲
//!     300/301/ │  │ Location
//!  302/303/305/│  │
//!          307 ▼  │
//!           Redirecting ──budget spent────► TooManyRedirections
//!              │
//!              └──no Location─────────────► ServerResponse
//! ```
//!
//! Transport failures become [`FetchError::Transfer`](crate::error::FetchError)
//! and any other status becomes `ServerResponse`. A 301 on the descriptor
//! request is surfaced as the pyramid's new canonical base URL.

mod http;
mod metadata;
mod tile;

pub use http::{
    get_following_redirects, normalize_base_url, Fetched, HttpResponse, HttpTransport,
    ReqwestTransport, REDIRECT_CODES,
};
pub use metadata::{descriptor_url, DescriptorDocument, MetadataClient};
pub use tile::{tile_url, TileClient};
