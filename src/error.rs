//! Error taxonomy for the resolution, transcoding and caching pipeline.
//!
//! Provider failures are local to one provider and are absorbed by the
//! resolver's fallback loop. Everything past resolution is reported as a
//! [`StreamError`], which is scoped to a single cache key's fetch episode and
//! is cloned verbatim to every session waiting on that episode.

use std::io;

/// Outcome of a single provider lookup that did not produce a source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The provider answered, but has no acceptable match for the track.
    #[error("track not found")]
    NotFound,

    /// Transient failure (network, outage, rate limit, bad upstream payload).
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider did not answer within its time budget.
    #[error("provider timed out: {0}")]
    Timeout(String),
}

impl ProviderError {
    /// Whether the failure is transient and the provider should be retried later.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ProviderError::NotFound)
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.status() == Some(reqwest::StatusCode::NOT_FOUND) {
            ProviderError::NotFound
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }
}

/// Failure of a stream request or of the fetch episode backing it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Every configured provider was tried without producing a source.
    #[error("no source found: {0}")]
    NoSourceFound(String),

    /// The raw source stream broke mid-transfer or could not be opened.
    #[error("source read error: {0}")]
    SourceRead(String),

    /// The encoder could not be spawned, crashed or exited non-zero.
    #[error("encoder process error: {0}")]
    EncodeProcess(String),

    /// The encoder produced no output within the idle budget.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Writing the cache file failed (disk full, permissions, ...).
    #[error("cache write error: {0}")]
    CacheWrite(String),

    /// Reading an already written cache file failed.
    #[error("I/O error: {0}")]
    Io(String),

    /// The cache entry is held by readers or still being written.
    #[error("cache entry busy: {0}")]
    Busy(String),

    /// The query carries neither an external id nor a title.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        StreamError::Io(err.to_string())
    }
}

/// Result type used by the streaming core.
pub type StreamResult<T> = Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_not_transient() {
        assert!(!ProviderError::NotFound.is_transient());
        assert!(ProviderError::Unavailable("502".into()).is_transient());
        assert!(ProviderError::Timeout("slow".into()).is_transient());
    }

    #[test]
    fn io_errors_keep_their_message() {
        let err: StreamError = io::Error::new(io::ErrorKind::Other, "disk gone").into();
        assert_eq!(err, StreamError::Io("disk gone".into()));
    }
}
