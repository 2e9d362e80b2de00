use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::{
    cache::{
        CacheInner,
        entry::{Entry, EntryInner, EntryState, lock},
        key::CacheKey,
    },
    error::{StreamError, StreamResult},
};

/// Result of one eviction pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub evicted: Vec<CacheKey>,
    pub freed: u64,
    pub remaining: u64,
}

pub(crate) fn ready_bytes(entries: &HashMap<CacheKey, Arc<Entry>>) -> u64 {
    entries
        .values()
        .map(|e| {
            let inner = e.lock();
            if inner.state == EntryState::Ready { inner.size } else { 0 }
        })
        .sum()
}

/// A victim taken out of the index whose file is still on disk.
///
/// The gate stays locked until the file is gone; a fresh episode for the same
/// key waits on it before publishing its own complete file.
struct Unlink {
    key: CacheKey,
    path: PathBuf,
    size: u64,
    gate: Arc<AsyncMutex<()>>,
    held: OwnedMutexGuard<()>,
}

impl Unlink {
    async fn run(self, cache: &CacheInner) -> io::Result<()> {
        let result = remove_file(&self.path).await;
        let Self { key, gate, held, .. } = self;
        drop(held);
        let mut unlinking = lock(&cache.unlinking);
        if unlinking.get(&key).is_some_and(|g| Arc::ptr_eq(g, &gate)) {
            unlinking.remove(&key);
        }
        result
    }
}

/// Takes `entry` out of the index. Caller holds the index lock and has
/// checked that the entry has no readers and is not fetching.
fn detach(
    cache: &CacheInner,
    entries: &mut HashMap<CacheKey, Arc<Entry>>,
    entry: &Entry,
    inner: &mut EntryInner,
) -> Option<Unlink> {
    let had_file = inner.state == EntryState::Ready;
    let size = inner.size;
    inner.state = EntryState::Empty;
    inner.size = 0;
    inner.episode = None;
    entries.remove(&entry.key);

    if !had_file {
        return None;
    }
    let gate = Arc::new(AsyncMutex::new(()));
    let held = Arc::clone(&gate).try_lock_owned().ok()?;
    lock(&cache.unlinking).insert(entry.key.clone(), Arc::clone(&gate));
    Some(Unlink {
        key: entry.key.clone(),
        path: cache.final_path(&entry.key),
        size,
        gate,
        held,
    })
}

/// Evicts idle `Ready` entries, least recently used first, until the total
/// size of `Ready` entries fits the budget.
///
/// Victims are chosen and taken out of the index under the index lock, so no
/// reader can acquire one between the check and its removal. Their files are
/// deleted after the lock is released. Entries with readers are never
/// touched, which may leave the cache over budget until they are released.
pub(crate) async fn sweep(cache: &CacheInner) -> SweepReport {
    let budget = cache.settings.max_bytes;
    let mut report = SweepReport::default();

    let victims = {
        let mut entries = lock(&cache.entries);
        let mut total = ready_bytes(&entries);
        if total <= budget {
            report.remaining = total;
            return report;
        }

        let mut candidates: Vec<_> = entries
            .values()
            .filter_map(|e| {
                let inner = e.lock();
                (inner.state == EntryState::Ready && inner.readers == 0)
                    .then(|| (inner.last_access, Arc::clone(e)))
            })
            .map(|(at, e)| (at, e.key.clone(), e))
            .collect();
        candidates.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        let mut victims = Vec::new();
        for (_, _, entry) in candidates {
            if total <= budget {
                break;
            }
            let mut inner = entry.lock();
            if inner.state != EntryState::Ready || inner.readers > 0 {
                continue;
            }
            if let Some(unlink) = detach(cache, &mut entries, &entry, &mut inner) {
                total -= unlink.size;
                victims.push(unlink);
            }
        }
        report.remaining = total;
        victims
    };

    for unlink in victims {
        let (key, freed) = (unlink.key.clone(), unlink.size);
        if let Err(e) = unlink.run(cache).await {
            warn!(key = %key, error = %e, "cache: eviction could not delete file");
        }
        debug!(key = %key, freed, "cache: evicted");
        report.freed += freed;
        report.evicted.push(key);
    }

    if report.remaining > budget {
        warn!(
            remaining = report.remaining,
            budget, "cache: still over budget, remaining entries are in use"
        );
    } else if !report.evicted.is_empty() {
        info!(
            evicted = report.evicted.len(),
            freed = report.freed,
            "cache: sweep finished"
        );
    }
    report
}

pub(crate) async fn remove(cache: &CacheInner, key: &CacheKey) -> StreamResult<bool> {
    let unlink = {
        let mut entries = lock(&cache.entries);
        let Some(entry) = entries.get(key).cloned() else {
            return Ok(false);
        };

        let mut inner = entry.lock();
        if inner.readers > 0 {
            return Err(StreamError::Busy(format!(
                "{} has {} active readers",
                key, inner.readers
            )));
        }
        if inner.state == EntryState::Fetching {
            return Err(StreamError::Busy(format!("{} is being fetched", key)));
        }
        detach(cache, &mut entries, &entry, &mut inner)
    };

    if let Some(unlink) = unlink {
        unlink
            .run(cache)
            .await
            .map_err(|e| StreamError::Io(format!("{}: {}", key, e)))?;
    }
    Ok(true)
}

/// Waits until no eviction is still deleting the complete file of `key`.
pub(crate) async fn wait_unlinked(cache: &CacheInner, key: &CacheKey) {
    let gate = lock(&cache.unlinking).get(key).cloned();
    if let Some(gate) = gate {
        drop(gate.lock().await);
    }
}

async fn remove_file(path: &Path) -> io::Result<()> {
    match async_fs::remove_file(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
