use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{
    error::{StreamError, StreamResult},
    matching,
    types::TrackQuery,
};

const EXTERNAL_PREFIX: &str = "ext-";
const METADATA_PREFIX: &str = "meta-";
const CATALOG_PREFIX: &str = "id-";

/// Longest external id kept verbatim; longer ones are hashed.
const MAX_VERBATIM_ID: usize = 64;
const DIGEST_HEX_LEN: usize = 32;

/// Deterministic, filename-safe identifier of a cached track.
///
/// Derivation prefers the external id (`ext-USABC1234567`); without one the
/// canonical "title + artists" string is hashed (`meta-<hex>`), and only a
/// query with neither falls back to the upstream catalog id (`id-<hex>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(query: &TrackQuery) -> StreamResult<Self> {
        if let Some(id) = query.external_id.as_deref() {
            let id = matching::normalize_external_id(id);
            if !id.is_empty() {
                if id.len() <= MAX_VERBATIM_ID {
                    return Ok(Self(format!("{}{}", EXTERNAL_PREFIX, id)));
                }
                return Ok(Self(format!("{}{}", EXTERNAL_PREFIX, digest(&id))));
            }
        }

        let title = matching::normalize(&query.title);
        if !title.is_empty() {
            let canonical = format!("{}\u{1f}{}", title, matching::normalize_artists(&query.artists));
            return Ok(Self(format!("{}{}", METADATA_PREFIX, digest(&canonical))));
        }

        if let Some(id) = query.fallback_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            return Ok(Self(format!("{}{}", CATALOG_PREFIX, digest(id))));
        }

        Err(StreamError::InvalidQuery(
            "query needs an external id, a title or a catalog id".into(),
        ))
    }

    /// Recovers a key from a cache file name stem, rejecting foreign files.
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let rest = [EXTERNAL_PREFIX, METADATA_PREFIX, CATALOG_PREFIX]
            .iter()
            .find_map(|p| stem.strip_prefix(p))?;
        let valid = !rest.is_empty()
            && rest.len() <= MAX_VERBATIM_ID
            && rest.chars().all(|c| c.is_ascii_alphanumeric());
        valid.then(|| Self(stem.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn digest(input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    let hex: String = hash.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..DIGEST_HEX_LEN].to_string()
}
