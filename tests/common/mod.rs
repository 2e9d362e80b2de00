// Shared fixtures for the integration tests. Not every test file uses every
// helper.
#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use trackstream::{
    cache::CacheManager,
    config::{CacheSettings, EncoderSettings, ResolverSettings},
    error::{ProviderError, StreamResult},
    pipeline::Pipeline,
    providers::Provider,
    resolver::Resolver,
    session::StreamSession,
    transcode::Transcoder,
    types::{ProviderSource, SourceLocator, TrackMetadata, TrackQuery},
};

pub enum Behavior {
    Found(ProviderSource),
    Fail(ProviderError),
    /// Answers with the source whose matched external id equals the query's.
    Catalog(Vec<ProviderSource>),
}

/// Provider double that answers with a fixed result and counts its calls.
pub struct MockProvider {
    name: String,
    behavior: Behavior,
    delay: Duration,
    calls: AtomicUsize,
}

impl MockProvider {
    pub fn found(name: &str, source: ProviderSource) -> Arc<Self> {
        Arc::new(Self::new(name, Behavior::Found(source)))
    }

    pub fn failing(name: &str, err: ProviderError) -> Arc<Self> {
        Arc::new(Self::new(name, Behavior::Fail(err)))
    }

    pub fn slow(name: &str, source: ProviderSource, delay: Duration) -> Arc<Self> {
        let mut provider = Self::new(name, Behavior::Found(source));
        provider.delay = delay;
        Arc::new(provider)
    }

    pub fn catalog(name: &str, sources: Vec<ProviderSource>) -> Arc<Self> {
        Arc::new(Self::new(name, Behavior::Catalog(sources)))
    }

    fn new(name: &str, behavior: Behavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn locate(&self, query: &TrackQuery) -> Result<ProviderSource, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.behavior {
            Behavior::Found(source) => Ok(source.clone()),
            Behavior::Fail(err) => Err(err.clone()),
            Behavior::Catalog(sources) => sources
                .iter()
                .find(|s| s.matched.external_id == query.external_id)
                .cloned()
                .ok_or(ProviderError::NotFound),
        }
    }
}

pub fn song_a() -> TrackQuery {
    TrackQuery::new("Song A", vec!["Artist X".to_string()]).with_external_id("ISRC123")
}

pub fn song(title: &str, isrc: &str) -> TrackQuery {
    TrackQuery::new(title, vec!["Artist X".to_string()]).with_external_id(isrc)
}

/// A file-backed source whose matched metadata mirrors `query`.
pub fn file_source(provider: &str, path: &Path, query: &TrackQuery) -> ProviderSource {
    ProviderSource {
        provider: provider.to_string(),
        locator: SourceLocator::File(path.to_path_buf()),
        estimated_size: None,
        matched: TrackMetadata {
            title: query.title.clone(),
            artists: query.artists.clone(),
            external_id: query.external_id.clone(),
            duration: query.duration_hint,
        },
    }
}

/// Writes `len` bytes of a repeating pattern and returns the path.
pub fn write_source(dir: &Path, name: &str, len: usize) -> PathBuf {
    let path = dir.join(name);
    let bytes: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, bytes).unwrap();
    path
}

/// `cat` as the encoder: output equals input, no ffmpeg needed.
pub fn passthrough_encoder() -> EncoderSettings {
    EncoderSettings {
        program: "cat".into(),
        args: vec![],
        bitrate: "320k".to_string(),
        idle_timeout: Duration::from_secs(5),
    }
}

/// Encoder that emits the first `bytes` of its input and then dies by SIGKILL.
pub fn crashing_encoder(bytes: usize) -> EncoderSettings {
    EncoderSettings {
        program: "sh".into(),
        args: vec!["-c".to_string(), format!("head -c {}; kill -9 $$", bytes)],
        bitrate: "320k".to_string(),
        idle_timeout: Duration::from_secs(5),
    }
}

/// Encoder that emits at most `first` bytes, pauses, then passes the rest
/// through. `dd` reads exactly once, so no input is lost between the two.
pub fn stalling_encoder(first: usize, pause: &str) -> EncoderSettings {
    EncoderSettings {
        program: "sh".into(),
        args: vec![
            "-c".to_string(),
            format!("dd bs={} count=1 2>/dev/null; sleep {}; cat", first, pause),
        ],
        bitrate: "320k".to_string(),
        idle_timeout: Duration::from_secs(5),
    }
}

pub fn pipeline(providers: Vec<Arc<dyn Provider>>, encoder: EncoderSettings) -> Arc<Pipeline> {
    let resolver = Resolver::new(providers, &ResolverSettings::default());
    let transcoder = Transcoder::new(encoder, reqwest::Client::new());
    Arc::new(Pipeline::new(resolver, transcoder))
}

pub async fn open_cache(dir: &Path, max_bytes: u64, pipeline: Arc<Pipeline>) -> CacheManager {
    let mut settings = CacheSettings::new(dir, max_bytes);
    settings.reader_liveness = Duration::from_millis(50);
    CacheManager::open(settings, pipeline).await.unwrap()
}

/// Reads a session to its end.
pub async fn drain(mut session: StreamSession) -> StreamResult<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = session.read().await? {
        out.extend_from_slice(&chunk);
    }
    Ok(out)
}

/// Acquires `query` and reads the whole stream.
pub async fn fetch_all(cache: &CacheManager, query: &TrackQuery) -> StreamResult<Vec<u8>> {
    let handle = cache.acquire(query)?;
    drain(StreamSession::open(handle)).await
}
