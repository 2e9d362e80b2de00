use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    config::DeezerSettings,
    error::ProviderError,
    matching,
    providers::{Provider, check_status},
    types::{
        DeezerDownloadResponse, DeezerSearchResponse, DeezerTrack, ProviderSource, SourceLocator,
        TrackMetadata, TrackQuery,
    },
};

/// Deezer public catalog for lookup plus a download-link resolver service.
pub struct DeezerProvider {
    client: Client,
    settings: DeezerSettings,
}

impl DeezerProvider {
    pub fn new(client: Client, settings: DeezerSettings) -> Self {
        Self { client, settings }
    }

    /// Looks a track up by ISRC. `Ok(None)` when Deezer reports no such track.
    async fn track_by_isrc(&self, isrc: &str) -> Result<Option<DeezerTrack>, ProviderError> {
        let res = self
            .client
            .get(format!(
                "{}/2.0/track/isrc:{}",
                self.settings.public_api_url, isrc
            ))
            .send()
            .await?;
        match check_status(&res) {
            Err(ProviderError::NotFound) => return Ok(None),
            other => other?,
        }

        let body: Value = res
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("bad track response: {}", e)))?;
        // deezer answers 200 with {"error": {...}} for unknown isrcs
        if body.get("error").is_some() {
            return Ok(None);
        }

        serde_json::from_value(body)
            .map(Some)
            .map_err(|e| ProviderError::Unavailable(format!("bad track payload: {}", e)))
    }

    async fn search(&self, query: &TrackQuery) -> Result<Option<DeezerTrack>, ProviderError> {
        let text = query.search_text();
        if text.is_empty() {
            return Ok(None);
        }

        let res = self
            .client
            .get(format!("{}/search", self.settings.public_api_url))
            .query(&[("q", text.as_str())])
            .send()
            .await?;
        check_status(&res)?;

        let body: DeezerSearchResponse = res
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("bad search response: {}", e)))?;
        Ok(
            matching::best_candidate(query, &body.data, |t| TrackMetadata::from(t.clone()))
                .cloned(),
        )
    }

    async fn download_url(&self, track_id: u64) -> Result<String, ProviderError> {
        let res = self
            .client
            .get(format!("{}/dl/{}", self.settings.download_api_url, track_id))
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(ProviderError::Unavailable(format!(
                "deezer download api returned {}",
                res.status()
            )));
        }

        let body: DeezerDownloadResponse = res
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("bad download response: {}", e)))?;
        if !body.success {
            return Err(ProviderError::NotFound);
        }
        body.links
            .and_then(|l| l.flac)
            .ok_or(ProviderError::NotFound)
    }
}

#[async_trait]
impl Provider for DeezerProvider {
    fn name(&self) -> &str {
        "deezer"
    }

    async fn locate(&self, query: &TrackQuery) -> Result<ProviderSource, ProviderError> {
        let mut track = None;
        if let Some(isrc) = query.external_id.as_deref() {
            track = self.track_by_isrc(isrc).await?;
            if track.is_none() {
                debug!(isrc, "deezer: no isrc hit, falling back to search");
            }
        }
        if track.is_none() {
            track = self.search(query).await?;
        }
        let track = track.ok_or(ProviderError::NotFound)?;

        let url = self.download_url(track.id).await?;
        info!(track_id = track.id, "deezer: got download url");
        Ok(ProviderSource {
            provider: self.name().to_string(),
            locator: SourceLocator::Http(url),
            estimated_size: None,
            matched: track.into(),
        })
    }
}
