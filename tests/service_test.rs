#![cfg(unix)]

mod common;

use std::sync::Arc;

use common::*;
use reqwest::{StatusCode, header};
use serde_json::Value;
use trackstream::{
    api::status_for,
    error::{ProviderError, StreamError},
    providers::Provider,
    server,
    service::{CONTENT_TYPE, StreamService},
};

struct Fixture {
    base: String,
    source: Vec<u8>,
    _dir: tempfile::TempDir,
}

async fn serve(encoder: trackstream::config::EncoderSettings) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let query = song_a();
    let path = write_source(dir.path(), "source.flac", 40_000);
    let pipeline = pipeline(
        vec![
            MockProvider::failing("deezer", ProviderError::NotFound) as Arc<dyn Provider>,
            MockProvider::catalog("tidal", vec![file_source("tidal", &path, &query)])
                as Arc<dyn Provider>,
        ],
        encoder,
    );
    let cache = open_cache(&dir.path().join("cache"), 10_000_000, pipeline).await;
    let service = Arc::new(StreamService::new(cache));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, server::router(service)).await.unwrap();
    });

    Fixture {
        base: format!("http://{}", addr),
        source: std::fs::read(&path).unwrap(),
        _dir: dir,
    }
}

#[tokio::test]
async fn health_reports_version() {
    let fx = serve(passthrough_encoder()).await;
    let body: Value = reqwest::get(format!("{}/api/health", fx.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn streams_audio_and_serves_repeats_with_a_length() {
    let fx = serve(passthrough_encoder()).await;
    let url = format!("{}/api/stream/ISRC123?q=Song%20A", fx.base);

    let first = reqwest::get(&url).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()[header::CONTENT_TYPE], CONTENT_TYPE);
    assert_eq!(first.headers()[header::ACCEPT_RANGES], "none");
    assert_eq!(first.bytes().await.unwrap().as_ref(), fx.source.as_slice());

    let second = reqwest::get(&url).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(
        second.headers()[header::CONTENT_LENGTH],
        fx.source.len().to_string().as_str()
    );
    assert_eq!(second.bytes().await.unwrap().len(), fx.source.len());

    let index: Value = reqwest::get(format!("{}/api/cache", fx.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(index["entries"][0]["key"], "ext-ISRC123");
    assert_eq!(index["entries"][0]["state"], "ready");
    assert_eq!(index["ready_bytes"], fx.source.len() as u64);
}

#[tokio::test]
async fn query_string_form_resolves_the_same_track() {
    let fx = serve(passthrough_encoder()).await;
    let url = format!(
        "{}/api/stream?isrc=ISRC123&title=Song%20A&artists=Artist%20X&duration=200",
        fx.base
    );

    let res = reqwest::get(&url).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.bytes().await.unwrap().len(), fx.source.len());
}

#[tokio::test]
async fn unknown_tracks_are_not_found() {
    let fx = serve(passthrough_encoder()).await;
    let res = reqwest::get(format!("{}/api/stream/NOPE00000001", fx.base))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_queries_are_bad_requests() {
    let fx = serve(passthrough_encoder()).await;
    let res = reqwest::get(format!("{}/api/stream", fx.base)).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn encoder_failures_surface_before_headers() {
    let fx = serve(crashing_encoder(0)).await;
    let res = reqwest::get(format!("{}/api/stream/ISRC123", fx.base))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: Value = res.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("encoder"));
}

#[test]
fn error_statuses() {
    assert_eq!(status_for(&StreamError::NoSourceFound("x".into())), StatusCode::NOT_FOUND);
    assert_eq!(status_for(&StreamError::InvalidQuery("x".into())), StatusCode::BAD_REQUEST);
    assert_eq!(status_for(&StreamError::Busy("x".into())), StatusCode::CONFLICT);
    assert_eq!(status_for(&StreamError::Timeout("x".into())), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(status_for(&StreamError::CacheWrite("x".into())), StatusCode::BAD_GATEWAY);
}
