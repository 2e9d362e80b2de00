use tracing::debug;

use crate::{
    error::StreamResult,
    resolver::Resolver,
    transcode::{TranscodeJob, Transcoder},
    types::TrackQuery,
};

/// Resolve-then-transcode, the work behind one cache fetch episode.
pub struct Pipeline {
    resolver: Resolver,
    transcoder: Transcoder,
}

impl Pipeline {
    pub fn new(resolver: Resolver, transcoder: Transcoder) -> Self {
        Self {
            resolver,
            transcoder,
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn transcoder(&self) -> &Transcoder {
        &self.transcoder
    }

    /// Locates a source for `query` and starts encoding it.
    pub async fn start(&self, query: &TrackQuery) -> StreamResult<TranscodeJob> {
        let source = self.resolver.resolve(query).await?;
        debug!(
            provider = %source.provider,
            matched = %source.matched.title,
            "pipeline: starting transcode"
        );
        self.transcoder.transcode(&source).await
    }
}
