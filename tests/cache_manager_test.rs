#![cfg(unix)]

mod common;

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use common::*;
use trackstream::{
    cache::{CacheKey, EntryState},
    error::{ProviderError, StreamError},
    providers::Provider,
    session::StreamSession,
};

/// Eviction deletes files after leaving the index lock; give it a moment.
async fn wait_until_gone(path: &Path) -> bool {
    for _ in 0..100 {
        if !path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    !path.exists()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let query = song_a();
    let source = write_source(dir.path(), "source.flac", 300_000);
    let provider = MockProvider::slow(
        "tidal",
        file_source("tidal", &source, &query),
        Duration::from_millis(100),
    );
    let pipeline = pipeline(
        vec![provider.clone() as Arc<dyn Provider>],
        passthrough_encoder(),
    );
    let cache = open_cache(&dir.path().join("cache"), 10_000_000, pipeline).await;

    let mut readers = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let query = query.clone();
        readers.push(tokio::spawn(async move { fetch_all(&cache, &query).await }));
    }

    let expected = std::fs::read(&source).unwrap();
    for reader in readers {
        let bytes = reader.await.unwrap().unwrap();
        assert_eq!(bytes.len(), expected.len());
        assert!(bytes == expected, "reader observed bytes out of order");
    }

    assert_eq!(provider.calls(), 1);
    assert_eq!(cache.pipeline().transcoder().jobs_started(), 1);

    let key = CacheKey::derive(&query).unwrap();
    assert_eq!(cache.state(&key), EntryState::Ready);
    let on_disk = std::fs::metadata(cache.path_for(&key)).unwrap().len();
    assert_eq!(on_disk, expected.len() as u64);
}

#[tokio::test]
async fn second_request_is_served_from_cache_without_providers() {
    let dir = tempfile::tempdir().unwrap();
    let query = song_a();
    let source = write_source(dir.path(), "source.flac", 50_000);

    let deezer = MockProvider::failing("deezer", ProviderError::NotFound);
    let tidal = MockProvider::found("tidal", file_source("tidal", &source, &query));
    let pipeline = pipeline(
        vec![
            deezer.clone() as Arc<dyn Provider>,
            tidal.clone() as Arc<dyn Provider>,
        ],
        passthrough_encoder(),
    );
    let cache = open_cache(&dir.path().join("cache"), 10_000_000, pipeline).await;
    assert_eq!(cache.pipeline().transcoder().bitrate(), "320k");

    let first = fetch_all(&cache, &query).await.unwrap();
    assert_eq!(first.len(), 50_000);
    assert_eq!((deezer.calls(), tidal.calls()), (1, 1));

    let handle = cache.acquire(&query).unwrap();
    assert_eq!(handle.state(), EntryState::Ready);
    assert_eq!(handle.len(), Some(50_000));

    let second = drain(StreamSession::open(handle)).await.unwrap();
    assert_eq!(second, first);
    assert_eq!((deezer.calls(), tidal.calls()), (1, 1));
    assert_eq!(cache.pipeline().transcoder().jobs_started(), 1);
}

#[tokio::test]
async fn session_reads_a_growing_file() {
    let dir = tempfile::tempdir().unwrap();
    let query = song_a();
    let source = write_source(dir.path(), "source.flac", 20_000);
    let provider = MockProvider::found("tidal", file_source("tidal", &source, &query));
    let pipeline = pipeline(
        vec![provider as Arc<dyn Provider>],
        stalling_encoder(1_000, "0.5"),
    );
    let cache = open_cache(&dir.path().join("cache"), 10_000_000, pipeline).await;

    let mut session = StreamSession::open(cache.acquire(&query).unwrap());
    session.prime().await.unwrap();

    // the encoder is paused after its first kilobyte
    assert_eq!(session.content_length(), None);
    assert!(session.position() <= 1_000);
    assert_eq!(
        cache.state(&CacheKey::derive(&query).unwrap()),
        EntryState::Fetching
    );

    let bytes = drain(session).await.unwrap();
    assert_eq!(bytes, std::fs::read(&source).unwrap());
}

#[tokio::test]
async fn killed_encoder_fails_every_reader_and_next_request_starts_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let query = song_a();
    let source = write_source(dir.path(), "source.flac", 5_000);
    let provider = MockProvider::found("tidal", file_source("tidal", &source, &query));
    let pipeline = pipeline(
        vec![provider.clone() as Arc<dyn Provider>],
        crashing_encoder(1_000),
    );
    let cache = open_cache(&dir.path().join("cache"), 10_000_000, pipeline).await;
    let key = CacheKey::derive(&query).unwrap();

    let a = StreamSession::open(cache.acquire(&query).unwrap());
    let b = StreamSession::open(cache.acquire(&query).unwrap());
    let (a, b) = tokio::join!(drain(a), drain(b));

    assert!(matches!(a, Err(StreamError::EncodeProcess(_))), "{:?}", a);
    assert_eq!(a, b);
    assert_eq!(cache.state(&key), EntryState::Failed);
    assert_eq!(provider.calls(), 1);

    let snapshot = cache.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot[0].error.is_some());
    assert!(!dir.path().join("cache").join(format!("{}.part", key)).exists());

    let retry = fetch_all(&cache, &query).await;
    assert!(matches!(retry, Err(StreamError::EncodeProcess(_))));
    assert_eq!(provider.calls(), 2);
    assert_eq!(cache.pipeline().transcoder().jobs_started(), 2);
}

#[tokio::test]
async fn failed_entry_is_refetched_without_stale_data() {
    let dir = tempfile::tempdir().unwrap();
    let query = song_a();
    let source = dir.path().join("late.flac");
    let provider = MockProvider::found("tidal", file_source("tidal", &source, &query));
    let pipeline = pipeline(
        vec![provider.clone() as Arc<dyn Provider>],
        passthrough_encoder(),
    );
    let cache = open_cache(&dir.path().join("cache"), 10_000_000, pipeline).await;

    let missing = fetch_all(&cache, &query).await;
    assert!(matches!(missing, Err(StreamError::SourceRead(_))), "{:?}", missing);

    write_source(dir.path(), "late.flac", 4_000);
    let bytes = fetch_all(&cache, &query).await.unwrap();
    assert_eq!(bytes, std::fs::read(&source).unwrap());
    assert_eq!(provider.calls(), 2);
    assert_eq!(
        cache.state(&CacheKey::derive(&query).unwrap()),
        EntryState::Ready
    );
}

#[tokio::test]
async fn sweep_evicts_least_recently_used_idle_entries() {
    let dir = tempfile::tempdir().unwrap();
    let first = song("First", "ISRC0001");
    let second = song("Second", "ISRC0002");
    let first_src = write_source(dir.path(), "first.flac", 2_000);
    let second_src = write_source(dir.path(), "second.flac", 2_000);

    let provider = MockProvider::catalog(
        "tidal",
        vec![
            file_source("tidal", &first_src, &first),
            file_source("tidal", &second_src, &second),
        ],
    );
    let pipeline = pipeline(vec![provider as Arc<dyn Provider>], passthrough_encoder());
    let cache = open_cache(&dir.path().join("cache"), 3_000, pipeline).await;

    fetch_all(&cache, &first).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    fetch_all(&cache, &second).await.unwrap();

    let first_key = CacheKey::derive(&first).unwrap();
    let second_key = CacheKey::derive(&second).unwrap();

    // the sweep after the second entry completed already made room
    let report = cache.sweep().await;
    assert!(report.evicted.is_empty());
    assert_eq!(report.remaining, 2_000);

    assert_eq!(cache.state(&first_key), EntryState::Empty);
    assert_eq!(cache.state(&second_key), EntryState::Ready);
    assert!(cache.ready_bytes() <= 3_000);
    assert!(wait_until_gone(&cache.path_for(&first_key)).await);
    assert!(cache.path_for(&second_key).exists());
}

#[tokio::test]
async fn entries_with_readers_are_never_evicted() {
    let dir = tempfile::tempdir().unwrap();
    let query = song_a();
    let source = write_source(dir.path(), "source.flac", 2_000);
    let pipeline = pipeline(
        vec![MockProvider::found("tidal", file_source("tidal", &source, &query)) as Arc<dyn Provider>],
        passthrough_encoder(),
    );
    let cache = open_cache(&dir.path().join("cache"), 1_000, pipeline).await;
    let key = CacheKey::derive(&query).unwrap();

    let held = cache.acquire(&query).unwrap();
    let reader = cache.acquire(&query).unwrap();
    drain(StreamSession::open(reader)).await.unwrap();

    let report = cache.sweep().await;
    assert!(report.evicted.is_empty());
    assert_eq!(report.remaining, 2_000);
    assert_eq!(cache.state(&key), EntryState::Ready);
    assert!(matches!(cache.remove(&key).await, Err(StreamError::Busy(_))));

    cache.release(held);
    let report = cache.sweep().await;
    assert_eq!(report.evicted, vec![key.clone()]);
    assert_eq!(report.freed, 2_000);
    assert_eq!(cache.state(&key), EntryState::Empty);
    assert!(!cache.path_for(&key).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweeps_racing_new_readers_never_pull_a_file_from_under_them() {
    let dir = tempfile::tempdir().unwrap();
    let query = song_a();
    let source = write_source(dir.path(), "source.flac", 20_000);
    let provider = MockProvider::found("tidal", file_source("tidal", &source, &query));
    let pipeline = pipeline(
        vec![provider.clone() as Arc<dyn Provider>],
        passthrough_encoder(),
    );
    // a single entry is already over budget, so every idle moment is a victim
    let cache = open_cache(&dir.path().join("cache"), 1_000, pipeline).await;
    let expected = std::fs::read(&source).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let sweeper = {
        let cache = cache.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            while !stop.load(Ordering::SeqCst) {
                cache.sweep().await;
                tokio::task::yield_now().await;
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..6 {
        let cache = cache.clone();
        let query = query.clone();
        readers.push(tokio::spawn(async move {
            let mut results = Vec::new();
            for _ in 0..15 {
                results.push(fetch_all(&cache, &query).await);
            }
            results
        }));
    }

    for reader in readers {
        for result in reader.await.unwrap() {
            match result {
                Ok(bytes) => assert!(bytes == expected, "reader observed a torn file"),
                Err(e) => panic!("session failed while sweeps were running: {:?}", e),
            }
        }
    }
    stop.store(true, Ordering::SeqCst);
    sweeper.await.unwrap();
    assert!(provider.calls() >= 1);
    cache.sweep().await;
    let key = CacheKey::derive(&query).unwrap();
    assert_eq!(cache.state(&key), EntryState::Empty);
    assert!(wait_until_gone(&cache.path_for(&key)).await);
}

#[tokio::test]
async fn index_is_rebuilt_from_the_cache_directory() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let query = song_a();
    let source = write_source(dir.path(), "source.flac", 8_000);
    let provider = MockProvider::found("tidal", file_source("tidal", &source, &query));
    let pipeline = pipeline(
        vec![provider.clone() as Arc<dyn Provider>],
        passthrough_encoder(),
    );
    let cache = open_cache(&cache_dir, 10_000_000, pipeline.clone()).await;
    fetch_all(&cache, &query).await.unwrap();
    drop(cache);

    std::fs::write(cache_dir.join("ext-STALE1.part"), b"half").unwrap();
    std::fs::write(cache_dir.join("notes.txt"), b"keep me").unwrap();

    let cache = open_cache(&cache_dir, 10_000_000, pipeline).await;
    let key = CacheKey::derive(&query).unwrap();

    let snapshot = cache.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].key, key);
    assert_eq!(snapshot[0].state, EntryState::Ready);
    assert_eq!(snapshot[0].size, 8_000);
    assert!(!cache_dir.join("ext-STALE1.part").exists());
    assert!(cache_dir.join("notes.txt").exists());

    let bytes = fetch_all(&cache, &query).await.unwrap();
    assert_eq!(bytes.len(), 8_000);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn remove_deletes_idle_entries() {
    let dir = tempfile::tempdir().unwrap();
    let query = song_a();
    let source = write_source(dir.path(), "source.flac", 1_500);
    let pipeline = pipeline(
        vec![MockProvider::found("tidal", file_source("tidal", &source, &query)) as Arc<dyn Provider>],
        passthrough_encoder(),
    );
    let cache = open_cache(&dir.path().join("cache"), 10_000_000, pipeline).await;
    let key = CacheKey::derive(&query).unwrap();

    fetch_all(&cache, &query).await.unwrap();

    let mut session = StreamSession::open(cache.acquire(&query).unwrap());
    assert!(session.read().await.unwrap().is_some());
    assert!(matches!(cache.remove(&key).await, Err(StreamError::Busy(_))));
    session.close();

    assert_eq!(cache.remove(&key).await, Ok(true));
    assert!(!cache.path_for(&key).exists());
    assert_eq!(cache.remove(&key).await, Ok(false));
    assert!(cache.snapshot().is_empty());
}

#[tokio::test]
async fn queries_without_identity_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(vec![], passthrough_encoder());
    let cache = open_cache(dir.path(), 1_000, pipeline).await;

    let result = cache.acquire(&trackstream::types::TrackQuery::default());
    assert!(matches!(result, Err(StreamError::InvalidQuery(_))));
}

#[tokio::test]
async fn cache_write_failure_fails_readers_and_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let query = song_a();
    let source = write_source(dir.path(), "source.flac", 3_000);
    let provider = MockProvider::found("tidal", file_source("tidal", &source, &query));
    let pipeline = pipeline(
        vec![provider.clone() as Arc<dyn Provider>],
        passthrough_encoder(),
    );
    let cache = open_cache(&cache_dir, 10_000_000, pipeline).await;
    let key = CacheKey::derive(&query).unwrap();

    // a directory where the partial file belongs cannot be replaced
    let blocker = cache_dir.join(format!("{}.part", key));
    std::fs::create_dir(&blocker).unwrap();

    let failed = fetch_all(&cache, &query).await;
    assert!(matches!(failed, Err(StreamError::CacheWrite(_))), "{:?}", failed);
    assert_eq!(cache.state(&key), EntryState::Failed);

    std::fs::remove_dir(&blocker).unwrap();
    let bytes = fetch_all(&cache, &query).await.unwrap();
    assert_eq!(bytes.len(), 3_000);
    assert_eq!(provider.calls(), 2);
}
