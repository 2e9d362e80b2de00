//! # API Module
//!
//! Thin HTTP layer over [`crate::service::StreamService`].
//!
//! ## Endpoints
//!
//! - [`health`] - liveness probe with the crate version.
//! - [`stream_by_isrc`] - `GET /api/stream/{isrc}?q=..`, stream one track by
//!   its ISRC, `q` optionally carrying the title for providers without ISRC
//!   lookup.
//! - [`stream`] - `GET /api/stream?isrc=&title=&artists=&duration=`, the
//!   query-string form for tracks without an ISRC.
//! - [`cache_index`] - `GET /api/cache`, snapshot of the cache index.
//!
//! Stream responses are `audio/mpeg`. `Content-Length` is only sent when the
//! track was already fully cached; otherwise the body is chunked and follows
//! the encoder as it writes. A failure before the first byte maps to an HTTP
//! status (see [`status_for`]); a failure after that aborts the body.

mod cache;
mod health;
mod stream;

pub use cache::cache_index;
pub use health::health;
pub use stream::{StreamParams, status_for, stream, stream_by_isrc};
