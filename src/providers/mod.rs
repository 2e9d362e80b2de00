//! # Provider Clients
//!
//! Each provider turns a [`TrackQuery`] into a [`ProviderSource`]: a locator
//! for raw (usually lossless) audio plus the catalog metadata it matched.
//! Providers are polymorphic over a fixed variant set and are selected by the
//! configured priority order, never by runtime probing.
//!
//! ## Failure model
//!
//! Every failure is local to the provider and returned as a
//! [`ProviderError`]:
//! - `NotFound` - the provider answered but has no matching track
//! - `Unavailable` - outage, rate limit, malformed payload, exhausted mirrors
//! - `Timeout` - the provider exceeded the configured request budget
//!
//! The [`crate::resolver`] decides what to do with each of them.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};

use crate::{
    config::Settings,
    error::ProviderError,
    types::{ProviderKind, ProviderSource, TrackQuery},
};

pub mod deezer;
pub mod tidal;

pub use deezer::DeezerProvider;
pub use tidal::TidalProvider;

/// A backend able to locate raw audio for a track.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name used in logs and in [`ProviderSource::provider`].
    fn name(&self) -> &str;

    /// Locates a raw-audio source for `query`.
    async fn locate(&self, query: &TrackQuery) -> Result<ProviderSource, ProviderError>;
}

/// Shared HTTP client for provider lookups.
pub fn http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Instantiates the configured providers in priority order.
pub fn build_providers(settings: &Settings, client: Client) -> Vec<Arc<dyn Provider>> {
    settings
        .resolver
        .order
        .iter()
        .map(|kind| -> Arc<dyn Provider> {
            match kind {
                ProviderKind::Tidal => {
                    Arc::new(TidalProvider::new(client.clone(), settings.tidal.clone()))
                }
                ProviderKind::Deezer => {
                    Arc::new(DeezerProvider::new(client.clone(), settings.deezer.clone()))
                }
            }
        })
        .collect()
}

/// Maps a non-success HTTP status to the provider failure it stands for.
pub(crate) fn check_status(response: &Response) -> Result<(), ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    match status {
        StatusCode::NOT_FOUND => Err(ProviderError::NotFound),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Err(ProviderError::Timeout(
            format!("{} returned {}", response.url(), status),
        )),
        _ => Err(ProviderError::Unavailable(format!(
            "{} returned {}",
            response.url(),
            status
        ))),
    }
}
