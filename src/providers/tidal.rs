use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use async_trait::async_trait;

use crate::{
    config::TidalSettings,
    error::ProviderError,
    matching,
    providers::{Provider, check_status},
    types::{
        ProviderSource, SourceLocator, TidalManifest, TidalSearchResponse, TidalTokenResponse,
        TidalTrack, TrackMetadata, TrackQuery,
    },
};

const SEARCH_LIMIT: u32 = 25;

/// Seconds before expiry at which a token is treated as stale.
const TOKEN_REFRESH_BUFFER: u64 = 240;

struct CachedToken {
    access_token: String,
    expires_in: u64,
    obtained_at: u64,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        let now = Utc::now().timestamp() as u64;
        now + TOKEN_REFRESH_BUFFER >= self.obtained_at + self.expires_in
    }
}

/// Tidal catalog search plus a list of community download mirrors.
pub struct TidalProvider {
    client: Client,
    settings: TidalSettings,
    token: Mutex<Option<CachedToken>>,
    working_mirror: std::sync::Mutex<Option<String>>,
}

impl TidalProvider {
    pub fn new(client: Client, settings: TidalSettings) -> Self {
        Self {
            client,
            settings,
            token: Mutex::new(None),
            working_mirror: std::sync::Mutex::new(None),
        }
    }

    /// Returns a cached client-credentials token, refreshing it when stale.
    async fn valid_token(&self) -> Result<String, ProviderError> {
        let mut token = self.token.lock().await;
        if let Some(t) = token.as_ref().filter(|t| !t.is_expired()) {
            return Ok(t.access_token.clone());
        }

        let res = self
            .client
            .post(&self.settings.auth_url)
            .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
            .form(&[
                ("client_id", self.settings.client_id.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;
        // a rejected token request is an outage from the caller's point of view
        if let Err(e) = check_status(&res) {
            return Err(match e {
                ProviderError::NotFound => {
                    ProviderError::Unavailable("token endpoint not found".into())
                }
                other => other,
            });
        }

        let body: TidalTokenResponse = res
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("bad token response: {}", e)))?;
        let access_token = body.access_token.clone();
        *token = Some(CachedToken {
            access_token: body.access_token,
            expires_in: body.expires_in,
            obtained_at: Utc::now().timestamp() as u64,
        });
        debug!("tidal: obtained access token");
        Ok(access_token)
    }

    async fn search(&self, query: &TrackQuery) -> Result<Vec<TidalTrack>, ProviderError> {
        let token = self.valid_token().await?;
        let text = match (query.search_text(), &query.external_id) {
            (text, _) if !text.is_empty() => text,
            (_, Some(isrc)) => isrc.clone(),
            _ => return Err(ProviderError::NotFound),
        };

        let limit = SEARCH_LIMIT.to_string();
        let res = self
            .client
            .get(format!("{}/v1/search/tracks", self.settings.api_url))
            .bearer_auth(token)
            .query(&[
                ("query", text.as_str()),
                ("limit", limit.as_str()),
                ("offset", "0"),
                ("countryCode", self.settings.country_code.as_str()),
            ])
            .send()
            .await?;
        check_status(&res)?;

        let body: TidalSearchResponse = res
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("bad search response: {}", e)))?;
        Ok(body.items)
    }

    /// Mirrors in try order: the last one that worked goes first.
    fn mirror_order(&self) -> Vec<String> {
        let mut mirrors = self.settings.mirrors.clone();
        let working = self
            .working_mirror
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default();
        if let Some(working) = working {
            if let Some(pos) = mirrors.iter().position(|m| *m == working) {
                let m = mirrors.remove(pos);
                mirrors.insert(0, m);
            }
        }
        mirrors
    }

    async fn download_url_from_mirror(&self, mirror: &str, track_id: u64) -> Option<String> {
        let res = match self
            .client
            .get(format!("{}/track/", mirror))
            .query(&[
                ("id", track_id.to_string()),
                ("quality", self.settings.quality.clone()),
            ])
            .send()
            .await
        {
            Ok(res) => res,
            Err(e) => {
                warn!(mirror, error = %e, "tidal: mirror request failed");
                return None;
            }
        };

        if !res.status().is_success() {
            warn!(mirror, status = %res.status(), "tidal: mirror returned error status");
            return None;
        }

        let is_html = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_lowercase().contains("html"));
        if is_html {
            warn!(mirror, "tidal: mirror returned HTML instead of JSON");
            return None;
        }

        let payload: Value = match res.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(mirror, error = %e, "tidal: mirror returned invalid JSON");
                return None;
            }
        };

        let url = parse_mirror_payload(&payload);
        if url.is_none() {
            warn!(mirror, "tidal: mirror returned unexpected format");
        }
        url
    }

    async fn download_url(&self, track_id: u64) -> Result<String, ProviderError> {
        for mirror in self.mirror_order() {
            debug!(mirror = %mirror, track_id, "tidal: trying mirror");
            if let Some(url) = self.download_url_from_mirror(&mirror, track_id).await {
                if let Ok(mut working) = self.working_mirror.lock() {
                    *working = Some(mirror.clone());
                }
                info!(mirror = %mirror, track_id, "tidal: got download url");
                return Ok(url);
            }
        }

        Err(ProviderError::Unavailable("all tidal mirrors failed".into()))
    }
}

/// Extracts a download url from the payload shapes mirrors are known to return.
pub fn parse_mirror_payload(payload: &Value) -> Option<String> {
    // v2: {"version": .., "data": {"manifest": base64(json {"urls": [..]})}}
    if payload.get("version").is_some() {
        if let Some(manifest) = payload
            .get("data")
            .and_then(|d| d.get("manifest"))
            .and_then(Value::as_str)
        {
            let decoded = STANDARD.decode(manifest).ok()?;
            let manifest: TidalManifest = serde_json::from_slice(&decoded).ok()?;
            return manifest.urls.into_iter().next();
        }
    }

    let field = |item: &Value, name: &str| item.get(name).and_then(Value::as_str).map(String::from);
    match payload {
        Value::Array(items) => items.iter().find_map(|i| field(i, "OriginalTrackUrl")),
        Value::Object(_) => field(payload, "OriginalTrackUrl").or_else(|| field(payload, "url")),
        _ => None,
    }
}

#[async_trait]
impl Provider for TidalProvider {
    fn name(&self) -> &str {
        "tidal"
    }

    async fn locate(&self, query: &TrackQuery) -> Result<ProviderSource, ProviderError> {
        let items = self.search(query).await?;
        let track = matching::best_candidate(query, &items, |t| TrackMetadata::from(t.clone()))
            .cloned()
            .ok_or(ProviderError::NotFound)?;

        let track_id = track.id;
        let url = self.download_url(track_id).await?;
        Ok(ProviderSource {
            provider: self.name().to_string(),
            locator: SourceLocator::Http(url),
            estimated_size: None,
            matched: track.into(),
        })
    }
}
