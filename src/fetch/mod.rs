//! Deduplicated, cancellable fetching.
//!
//! - [`TaskRegistry`]: single-flight registry with a concurrency ceiling
//! - [`FetchOutcome`]: `Success | Failed | Cancelled`, one per listener
//! - [`fetch_tile`] / [`load_pyramid`]: the work a task performs

mod jobs;
mod outcome;
mod registry;

pub use jobs::{fetch_tile, load_pyramid, LoadedPyramid};
pub use outcome::FetchOutcome;
pub use registry::{Enqueued, Listener, TaskRegistry};
