//! The inbound boundary of the core: turn a [`TrackQuery`] into a live byte
//! stream backed by the cache.

use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, stream};
use reqwest::Client;
use tracing::{debug, info};

use crate::{
    Res,
    cache::{CacheKey, CacheManager},
    config::Settings,
    error::{StreamError, StreamResult},
    pipeline::Pipeline,
    providers,
    resolver::Resolver,
    session::StreamSession,
    transcode::Transcoder,
    types::TrackQuery,
};

/// Content type of every stream the core produces.
pub const CONTENT_TYPE: &str = "audio/mpeg";

pub struct StreamService {
    cache: CacheManager,
}

impl StreamService {
    pub fn new(cache: CacheManager) -> Self {
        Self { cache }
    }

    /// Wires providers, resolver, encoder and cache from `settings` and opens
    /// the cache directory.
    ///
    /// Provider lookups share a client bounded by the provider timeout. Source
    /// downloads get their own client with only a connect timeout, since a
    /// full-length download may legitimately outlast any fixed budget.
    pub async fn from_settings(settings: &Settings) -> Res<Self> {
        let lookup_client = providers::http_client(settings.provider_timeout)?;
        let source_client = Client::builder()
            .connect_timeout(settings.provider_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let resolver = Resolver::new(
            providers::build_providers(settings, lookup_client),
            &settings.resolver,
        );
        info!(
            providers = ?resolver.provider_names(),
            bitrate = %settings.encoder.bitrate,
            "service: pipeline configured"
        );

        let transcoder = Transcoder::new(settings.encoder.clone(), source_client);
        let pipeline = Arc::new(Pipeline::new(resolver, transcoder));
        let cache = CacheManager::open(settings.cache.clone(), pipeline).await?;
        Ok(Self::new(cache))
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Starts (or joins) the fetch for `query` and returns a stream over it.
    ///
    /// Waits for the first encoded bytes, so resolution and encoder start-up
    /// failures are returned here rather than in the middle of a response.
    pub async fn request_stream(&self, query: TrackQuery) -> StreamResult<TrackStream> {
        let handle = self.cache.acquire(&query)?;
        let key = handle.key().clone();
        debug!(key = %key, state = %handle.state(), "service: stream requested");

        let mut session = StreamSession::open(handle);
        session.prime().await?;

        Ok(TrackStream {
            key,
            content_type: CONTENT_TYPE,
            content_length: session.content_length(),
            session,
        })
    }
}

/// A live stream handed to the serving layer.
pub struct TrackStream {
    pub key: CacheKey,
    pub content_type: &'static str,
    /// Known only when the entry was already complete when the stream started.
    pub content_length: Option<u64>,
    session: StreamSession,
}

impl TrackStream {
    pub async fn next_chunk(&mut self) -> StreamResult<Option<Bytes>> {
        self.session.read().await
    }

    /// Converts into a stream of chunks that ends after the first error.
    /// Dropping it closes the session.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, StreamError>> + Send + 'static {
        stream::unfold(Some(self.session), |session| async move {
            let mut session = session?;
            match session.read().await {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(session))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
