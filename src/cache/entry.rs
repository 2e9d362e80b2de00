use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::{cache::key::CacheKey, error::StreamError};

/// Lifecycle of a cache entry: `Empty -> Fetching -> Ready | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Empty,
    Fetching,
    Ready,
    Failed,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryState::Empty => "empty",
            EntryState::Fetching => "fetching",
            EntryState::Ready => "ready",
            EntryState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EpisodeStatus {
    Fetching,
    Ready,
    Failed(StreamError),
}

/// What readers of one episode may observe: bytes flushed so far and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Progress {
    pub written: u64,
    pub status: EpisodeStatus,
}

/// One fetch attempt (or one recovered file) backing an entry.
///
/// Readers subscribe to the episode rather than to the entry, so a retry after
/// a failure can never hand its fresh bytes to sessions of the failed attempt.
pub(crate) struct Episode {
    pub id: u64,
    part_path: PathBuf,
    final_path: PathBuf,
    progress: watch::Sender<Progress>,
}

impl Episode {
    pub fn fetching(id: u64, part_path: PathBuf, final_path: PathBuf) -> Self {
        let (progress, _) = watch::channel(Progress {
            written: 0,
            status: EpisodeStatus::Fetching,
        });
        Self {
            id,
            part_path,
            final_path,
            progress,
        }
    }

    pub fn ready(id: u64, final_path: PathBuf, size: u64) -> Self {
        let part_path = final_path.with_extension("part");
        let (progress, _) = watch::channel(Progress {
            written: size,
            status: EpisodeStatus::Ready,
        });
        Self {
            id,
            part_path,
            final_path,
            progress,
        }
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    pub fn current(&self) -> Progress {
        self.progress.borrow().clone()
    }

    /// Announces newly flushed bytes; never moves backwards.
    pub fn publish_written(&self, written: u64) {
        self.progress.send_modify(|p| {
            if written > p.written {
                p.written = written;
            }
        });
    }

    /// Moves a fetching episode to a terminal status. Returns `false` if it
    /// was already terminal.
    pub fn publish_terminal(&self, status: EpisodeStatus) -> bool {
        self.progress.send_if_modified(|p| {
            if p.status != EpisodeStatus::Fetching {
                return false;
            }
            p.status = status;
            true
        })
    }
}

pub(crate) struct EntryInner {
    pub state: EntryState,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub error: Option<StreamError>,
    pub readers: usize,
    pub episode: Option<std::sync::Arc<Episode>>,
}

pub(crate) struct Entry {
    pub key: CacheKey,
    inner: Mutex<EntryInner>,
}

impl Entry {
    pub fn empty(key: CacheKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            inner: Mutex::new(EntryInner {
                state: EntryState::Empty,
                size: 0,
                created_at: now,
                last_access: now,
                error: None,
                readers: 0,
                episode: None,
            }),
        }
    }

    pub fn recovered(key: CacheKey, episode: Episode, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            key,
            inner: Mutex::new(EntryInner {
                state: EntryState::Ready,
                size,
                created_at: modified,
                last_access: modified,
                error: None,
                readers: 0,
                episode: Some(std::sync::Arc::new(episode)),
            }),
        }
    }

    /// The per-key critical section guarding state, size and reader count.
    pub fn lock(&self) -> MutexGuard<'_, EntryInner> {
        lock(&self.inner)
    }

    pub fn release_reader(&self) {
        let mut inner = self.lock();
        inner.readers = inner.readers.saturating_sub(1);
        inner.last_access = Utc::now();
    }

    pub fn snapshot(&self) -> EntrySnapshot {
        let inner = self.lock();
        EntrySnapshot {
            key: self.key.clone(),
            state: inner.state,
            size: inner.size,
            readers: inner.readers,
            created_at: inner.created_at,
            last_access: inner.last_access,
            error: inner.error.as_ref().map(|e| e.to_string()),
        }
    }
}

/// Point-in-time view of one index entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub key: CacheKey,
    pub state: EntryState,
    pub size: u64,
    pub readers: usize,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub error: Option<String>,
}

/// Locks a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
