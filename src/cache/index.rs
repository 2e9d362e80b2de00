use std::path::Path;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{debug, warn};

use crate::{
    cache::{
        COMPLETE_EXTENSION, PARTIAL_EXTENSION,
        entry::{Entry, Episode},
        key::CacheKey,
    },
    error::{StreamError, StreamResult},
};

/// Scans `dir` and returns one `Ready` entry per complete cache file.
///
/// Partial files are leftovers of an interrupted run and are deleted. Files
/// whose names do not parse as a cache key are left alone.
pub(crate) async fn rebuild(dir: &Path) -> StreamResult<Vec<Entry>> {
    let mut listing = async_fs::read_dir(dir)
        .await
        .map_err(|e| StreamError::Io(format!("{}: {}", dir.display(), e)))?;

    let mut recovered = Vec::new();
    let mut episode_id = 0u64;

    while let Some(item) = listing.next().await {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                warn!(error = %e, "cache: skipping unreadable directory entry");
                continue;
            }
        };
        let path = item.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or_default();

        if extension == PARTIAL_EXTENSION {
            debug!(file = %path.display(), "cache: removing stale partial file");
            if let Err(e) = async_fs::remove_file(&path).await {
                warn!(file = %path.display(), error = %e, "cache: could not remove partial file");
            }
            continue;
        }
        if extension != COMPLETE_EXTENSION {
            continue;
        }
        let Some(key) = CacheKey::from_file_stem(stem) else {
            continue;
        };

        let metadata = match async_fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        episode_id += 1;
        let episode = Episode::ready(episode_id, path.clone(), metadata.len());
        recovered.push(Entry::recovered(key, episode, metadata.len(), modified));
    }

    Ok(recovered)
}
