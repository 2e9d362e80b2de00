//! # Cache Manager
//!
//! Content-addressable store of encoded tracks with single-flight fetching,
//! progressive multi-reader access and LRU eviction under a byte budget.
//!
//! ## Layout
//!
//! One file per entry under the cache directory, named from its [`CacheKey`]:
//! `<key>.part` while an episode is writing, renamed to `<key>.mp3` once the
//! encoder finished. The in-memory index is rebuilt from the `.mp3` files at
//! startup; leftover `.part` files are discarded.
//!
//! Eviction takes victims out of the index under the index lock and deletes
//! their files afterwards. A new episode for an evicted key waits for that
//! delete to finish before renaming its own `.part` file into place.
//!
//! ## Concurrency
//!
//! The index map and each entry have their own mutex, always taken in that
//! order and never held across an await. The entry mutex is the per-key
//! critical section: state transitions, the byte-size counter and the reader
//! count only change under it. Readers follow an episode through a `watch`
//! channel that is signalled after every flushed append and on the terminal
//! transition.
//!
//! ## Abandoned fetches
//!
//! A fetch episode runs on its own task and always continues to completion
//! when every reader disconnects, so an abandoned request still populates
//! the cache for the next one.
//!
//! ## Write failures
//!
//! Failing to write the cache file fails the episode with
//! [`StreamError::CacheWrite`], exactly like a source or encoder failure.
//! Connected readers receive that error and the entry becomes `Failed`; there
//! is no fallback that streams encoder output to them without the file. The
//! next request retries with a fresh episode.

mod entry;
mod eviction;
mod index;
mod key;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use tokio::{
    io::AsyncWriteExt,
    sync::{Mutex as AsyncMutex, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    config::CacheSettings,
    error::{StreamError, StreamResult},
    pipeline::Pipeline,
    types::TrackQuery,
};

pub use entry::{EntrySnapshot, EntryState};
pub use eviction::SweepReport;
pub use key::CacheKey;

pub(crate) use entry::{EpisodeStatus, Progress};
use entry::{Entry, Episode, lock};

const COMPLETE_EXTENSION: &str = "mp3";
const PARTIAL_EXTENSION: &str = "part";

pub(crate) struct CacheInner {
    settings: CacheSettings,
    pipeline: Arc<Pipeline>,
    entries: Mutex<HashMap<CacheKey, Arc<Entry>>>,
    unlinking: Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>,
    next_episode: AtomicU64,
}

impl CacheInner {
    fn final_path(&self, key: &CacheKey) -> PathBuf {
        self.settings
            .dir
            .join(format!("{}.{}", key, COMPLETE_EXTENSION))
    }

    fn part_path(&self, key: &CacheKey) -> PathBuf {
        self.settings
            .dir
            .join(format!("{}.{}", key, PARTIAL_EXTENSION))
    }
}

/// Cheaply cloneable handle to the shared cache.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<CacheInner>,
}

impl CacheManager {
    /// Opens the cache directory, rebuilding the index from the files in it.
    pub async fn open(settings: CacheSettings, pipeline: Arc<Pipeline>) -> StreamResult<Self> {
        async_fs::create_dir_all(&settings.dir)
            .await
            .map_err(|e| StreamError::CacheWrite(format!("{}: {}", settings.dir.display(), e)))?;

        let recovered = index::rebuild(&settings.dir).await?;
        info!(
            dir = %settings.dir.display(),
            entries = recovered.len(),
            "cache: index rebuilt"
        );

        let first_episode = recovered.len() as u64 + 1;
        let manager = Self {
            inner: Arc::new(CacheInner {
                settings,
                pipeline,
                entries: Mutex::new(
                    recovered
                        .into_iter()
                        .map(|e| (e.key.clone(), Arc::new(e)))
                        .collect(),
                ),
                unlinking: Mutex::new(HashMap::new()),
                next_episode: AtomicU64::new(first_episode),
            }),
        };
        Ok(manager)
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Path of the complete file for `key`; a pure function of the key.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.inner.final_path(key)
    }

    /// Returns a reader hold on the entry for `query`, starting a fetch
    /// episode when the entry is empty or failed.
    ///
    /// Concurrent callers for the same key share one episode: only the caller
    /// that moves the entry to `Fetching` spawns the resolve-and-transcode work.
    pub fn acquire(&self, query: &TrackQuery) -> StreamResult<CacheHandle> {
        let key = CacheKey::derive(query)?;

        let (entry, episode, start) = {
            let mut entries = lock(&self.inner.entries);
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Entry::empty(key.clone())))
                .clone();

            let mut inner = entry.lock();
            inner.readers += 1;
            inner.last_access = Utc::now();

            let live = match inner.state {
                EntryState::Ready | EntryState::Fetching => inner.episode.clone(),
                EntryState::Empty | EntryState::Failed => None,
            };
            let (episode, start) = match live {
                Some(episode) => (episode, false),
                None => {
                    let id = self.inner.next_episode.fetch_add(1, Ordering::SeqCst);
                    let episode = Arc::new(Episode::fetching(
                        id,
                        self.inner.part_path(&key),
                        self.inner.final_path(&key),
                    ));
                    debug!(key = %key, episode = id, previous = %inner.state, "cache: starting fetch episode");
                    inner.state = EntryState::Fetching;
                    inner.size = 0;
                    inner.error = None;
                    inner.created_at = Utc::now();
                    inner.episode = Some(episode.clone());
                    (episode, true)
                }
            };
            drop(inner);
            (entry, episode, start)
        };

        if start {
            let cache = Arc::clone(&self.inner);
            let entry = Arc::clone(&entry);
            let episode = Arc::clone(&episode);
            let query = query.clone();
            tokio::spawn(async move {
                run_episode(cache, entry, episode, query).await;
            });
        }

        Ok(CacheHandle {
            cache: Arc::clone(&self.inner),
            entry,
            episode,
        })
    }

    /// Drops a reader's hold. Equivalent to dropping the handle.
    pub fn release(&self, handle: CacheHandle) {
        drop(handle);
    }

    /// Current state of the entry for `key`, `Empty` when unknown.
    pub fn state(&self, key: &CacheKey) -> EntryState {
        let entries = lock(&self.inner.entries);
        entries
            .get(key)
            .map(|e| e.lock().state)
            .unwrap_or(EntryState::Empty)
    }

    /// Snapshot of every indexed entry, most recently used first.
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let entries: Vec<Arc<Entry>> = lock(&self.inner.entries).values().cloned().collect();
        let mut rows: Vec<EntrySnapshot> = entries.iter().map(|e| e.snapshot()).collect();
        rows.sort_by(|a, b| b.last_access.cmp(&a.last_access));
        rows
    }

    /// Total size of all `Ready` entries.
    pub fn ready_bytes(&self) -> u64 {
        let entries = lock(&self.inner.entries);
        eviction::ready_bytes(&entries)
    }

    /// Evicts least-recently-used idle `Ready` entries until the budget holds.
    pub async fn sweep(&self) -> SweepReport {
        eviction::sweep(&self.inner).await
    }

    /// Deletes one entry. Refused while readers hold it or it is being fetched.
    pub async fn remove(&self, key: &CacheKey) -> StreamResult<bool> {
        eviction::remove(&self.inner, key).await
    }

    /// Runs [`CacheManager::sweep`] now and then every `interval` until the
    /// task is aborted.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let report = cache.sweep().await;
                if !report.evicted.is_empty() {
                    info!(
                        evicted = report.evicted.len(),
                        freed = report.freed,
                        remaining = report.remaining,
                        "cache: periodic sweep"
                    );
                }
            }
        })
    }
}

/// A reader's hold on a cache entry.
///
/// While any handle exists the entry is never evicted. Dropping the handle
/// releases the hold; it never cancels the fetch episode.
pub struct CacheHandle {
    cache: Arc<CacheInner>,
    entry: Arc<Entry>,
    episode: Arc<Episode>,
}

impl CacheHandle {
    pub fn key(&self) -> &CacheKey {
        &self.entry.key
    }

    /// State of the episode this handle follows.
    pub fn state(&self) -> EntryState {
        match self.episode.current().status {
            EpisodeStatus::Fetching => EntryState::Fetching,
            EpisodeStatus::Ready => EntryState::Ready,
            EpisodeStatus::Failed(_) => EntryState::Failed,
        }
    }

    /// Final byte length, known once the entry is `Ready`.
    pub fn len(&self) -> Option<u64> {
        let progress = self.episode.current();
        (progress.status == EpisodeStatus::Ready).then_some(progress.written)
    }

    /// Bytes flushed to disk so far.
    pub fn written(&self) -> u64 {
        self.episode.current().written
    }

    pub fn reader_liveness(&self) -> Duration {
        self.cache.settings.reader_liveness
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Progress> {
        self.episode.subscribe()
    }

    pub(crate) fn part_path(&self) -> &Path {
        self.episode.part_path()
    }

    pub(crate) fn final_path(&self) -> &Path {
        self.episode.final_path()
    }
}

impl Drop for CacheHandle {
    fn drop(&mut self) {
        self.entry.release_reader();
    }
}

/// Marks the episode failed if its task ends without a terminal status
/// (panic, runtime shutdown), so blocked readers are released.
struct EpisodeGuard {
    entry: Arc<Entry>,
    episode: Arc<Episode>,
}

impl EpisodeGuard {
    fn finish(&self, status: EpisodeStatus, size: u64) {
        let mut inner = self.entry.lock();
        let current = inner
            .episode
            .as_ref()
            .is_some_and(|e| Arc::ptr_eq(e, &self.episode));
        if !self.episode.publish_terminal(status.clone()) || !current {
            return;
        }

        match status {
            EpisodeStatus::Ready => {
                inner.state = EntryState::Ready;
                inner.size = size;
                inner.error = None;
            }
            EpisodeStatus::Failed(e) => {
                inner.state = EntryState::Failed;
                inner.size = 0;
                inner.error = Some(e);
            }
            EpisodeStatus::Fetching => {}
        }
    }
}

impl Drop for EpisodeGuard {
    fn drop(&mut self) {
        self.finish(
            EpisodeStatus::Failed(StreamError::SourceRead(
                "fetch episode ended unexpectedly".into(),
            )),
            0,
        );
    }
}

async fn run_episode(
    cache: Arc<CacheInner>,
    entry: Arc<Entry>,
    episode: Arc<Episode>,
    query: TrackQuery,
) {
    let guard = EpisodeGuard {
        entry: Arc::clone(&entry),
        episode: Arc::clone(&episode),
    };

    match write_episode(&cache, &entry, &episode, &query).await {
        Ok(size) => {
            info!(key = %entry.key, episode = episode.id, size, "cache: entry ready");
            guard.finish(EpisodeStatus::Ready, size);
            drop(guard);
            eviction::sweep(&cache).await;
        }
        Err(e) => {
            warn!(key = %entry.key, episode = episode.id, error = %e, "cache: fetch failed");
            if let Err(rm) = tokio::fs::remove_file(episode.part_path()).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    debug!(error = %rm, "cache: could not remove partial file");
                }
            }
            guard.finish(EpisodeStatus::Failed(e), 0);
        }
    }
}

async fn write_episode(
    cache: &CacheInner,
    entry: &Entry,
    episode: &Episode,
    query: &TrackQuery,
) -> StreamResult<u64> {
    let mut job = cache.pipeline.start(query).await?;

    let write_err = |e: std::io::Error| {
        StreamError::CacheWrite(format!("{}: {}", episode.part_path().display(), e))
    };

    // a retry must never append to bytes of an earlier attempt
    match tokio::fs::remove_file(episode.part_path()).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(write_err(e)),
        _ => {}
    }
    let mut file = tokio::fs::File::create(episode.part_path())
        .await
        .map_err(write_err)?;

    let mut written = 0u64;
    while let Some(chunk) = job.next_chunk().await? {
        file.write_all(&chunk).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;
        written += chunk.len() as u64;

        entry.lock().size = written;
        episode.publish_written(written);
    }

    file.sync_data().await.map_err(write_err)?;
    drop(file);
    eviction::wait_unlinked(cache, &entry.key).await;
    tokio::fs::rename(episode.part_path(), episode.final_path())
        .await
        .map_err(write_err)?;
    Ok(written)
}
