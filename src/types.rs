use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use tabled::Tabled;

/// Identity of a logical track as supplied by the serving layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackQuery {
    pub title: String,
    pub artists: Vec<String>,
    /// Track length in seconds, when the catalog knows it.
    pub duration_hint: Option<u32>,
    /// Global recording id, usually an ISRC.
    pub external_id: Option<String>,
    /// Upstream catalog id, kept for logging and as a last-resort cache key.
    pub fallback_id: Option<String>,
}

impl TrackQuery {
    pub fn new(title: impl Into<String>, artists: Vec<String>) -> Self {
        Self {
            title: title.into(),
            artists,
            ..Self::default()
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_duration(mut self, seconds: u32) -> Self {
        self.duration_hint = Some(seconds);
        self
    }

    pub fn with_fallback_id(mut self, fallback_id: impl Into<String>) -> Self {
        self.fallback_id = Some(fallback_id.into());
        self
    }

    /// Free-text search string used by providers that search by words.
    pub fn search_text(&self) -> String {
        let mut parts = self.artists.clone();
        parts.push(self.title.clone());
        parts.retain(|p| !p.trim().is_empty());
        parts.join(" ")
    }
}

/// Metadata of the track a provider actually matched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    pub artists: Vec<String>,
    pub external_id: Option<String>,
    pub duration: Option<u32>,
}

/// Where the raw audio for one resolution lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    Http(String),
    File(PathBuf),
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Http(url) => {
                // signed download urls are long; the host and path prefix are enough
                let shown: String = url.chars().take(80).collect();
                write!(f, "{}", shown)
            }
            SourceLocator::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A locatable raw-audio source returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSource {
    pub provider: String,
    pub locator: SourceLocator,
    pub estimated_size: Option<u64>,
    pub matched: TrackMetadata,
}

/// Provider variants that can be named in the configured priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Tidal,
    Deezer,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Tidal => write!(f, "tidal"),
            ProviderKind::Deezer => write!(f, "deezer"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tidal" => Ok(ProviderKind::Tidal),
            "deezer" => Ok(ProviderKind::Deezer),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

#[derive(Tabled)]
pub struct CacheTableRow {
    pub key: String,
    pub state: String,
    pub size: String,
    pub readers: usize,
    pub last_access: String,
}

// Tidal wire types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TidalTokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_lifetime")]
    pub expires_in: u64,
}

fn default_token_lifetime() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TidalSearchResponse {
    #[serde(default)]
    pub items: Vec<TidalTrack>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TidalTrack {
    pub id: u64,
    pub title: String,
    pub isrc: Option<String>,
    pub duration: Option<u32>,
    #[serde(default)]
    pub artists: Vec<TidalArtist>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TidalArtist {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TidalManifest {
    #[serde(default)]
    pub urls: Vec<String>,
}

// Deezer wire types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeezerTrack {
    pub id: u64,
    pub title: String,
    pub isrc: Option<String>,
    pub duration: Option<u32>,
    pub artist: Option<DeezerArtist>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeezerArtist {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeezerSearchResponse {
    #[serde(default)]
    pub data: Vec<DeezerTrack>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeezerDownloadResponse {
    #[serde(default)]
    pub success: bool,
    pub links: Option<DeezerLinks>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeezerLinks {
    pub flac: Option<String>,
}

impl From<TidalTrack> for TrackMetadata {
    fn from(track: TidalTrack) -> Self {
        Self {
            title: track.title,
            artists: track.artists.into_iter().map(|a| a.name).collect(),
            external_id: track.isrc,
            duration: track.duration,
        }
    }
}

impl From<DeezerTrack> for TrackMetadata {
    fn from(track: DeezerTrack) -> Self {
        Self {
            title: track.title,
            artists: track.artist.into_iter().map(|a| a.name).collect(),
            external_id: track.isrc,
            duration: track.duration,
        }
    }
}
