//! Ordered provider fallback.
//!
//! The resolver walks the configured providers in priority order and returns
//! the first source that passes the match policy. Providers that recently
//! reported a transient failure are not skipped; they are moved behind the
//! healthy ones until their cooldown lapses.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
    config::ResolverSettings,
    error::{ProviderError, StreamError, StreamResult},
    matching,
    providers::Provider,
    types::{ProviderSource, TrackQuery},
};

struct Slot {
    provider: Arc<dyn Provider>,
    cooling_until: Mutex<Option<Instant>>,
}

impl Slot {
    fn is_cooling(&self, now: Instant) -> bool {
        self.cooling_until
            .lock()
            .map(|until| until.is_some_and(|t| t > now))
            .unwrap_or(false)
    }

    fn set_cooling(&self, until: Option<Instant>) {
        if let Ok(mut slot) = self.cooling_until.lock() {
            *slot = until;
        }
    }
}

pub struct Resolver {
    slots: Vec<Slot>,
    similarity_floor: f64,
    cooldown: Duration,
}

impl Resolver {
    /// `providers` must already be in priority order.
    pub fn new(providers: Vec<Arc<dyn Provider>>, settings: &ResolverSettings) -> Self {
        Self {
            slots: providers
                .into_iter()
                .map(|provider| Slot {
                    provider,
                    cooling_until: Mutex::new(None),
                })
                .collect(),
            similarity_floor: settings.similarity_floor,
            cooldown: settings.cooldown,
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.slots
            .iter()
            .map(|s| s.provider.name().to_string())
            .collect()
    }

    /// Healthy providers first, then cooling ones, each group in priority order.
    fn attempt_order(&self) -> Vec<&Slot> {
        let now = Instant::now();
        let (healthy, cooling): (Vec<&Slot>, Vec<&Slot>) =
            self.slots.iter().partition(|s| !s.is_cooling(now));
        healthy.into_iter().chain(cooling).collect()
    }

    /// Locates a source for `query`, failing with `NoSourceFound` once every
    /// provider has been tried.
    pub async fn resolve(&self, query: &TrackQuery) -> StreamResult<ProviderSource> {
        let mut attempts = Vec::new();

        for slot in self.attempt_order() {
            let name = slot.provider.name();
            debug!(provider = name, title = %query.title, "resolver: trying provider");

            let outcome = match slot.provider.locate(query).await {
                Ok(source) if matching::accepts(query, &source.matched, self.similarity_floor) => {
                    Ok(source)
                }
                Ok(source) => {
                    debug!(
                        provider = name,
                        matched = %source.matched.title,
                        score = matching::score(query, &source.matched),
                        "resolver: rejecting low-confidence match"
                    );
                    Err(ProviderError::NotFound)
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(source) => {
                    slot.set_cooling(None);
                    info!(
                        provider = name,
                        locator = %source.locator,
                        "resolver: source located"
                    );
                    return Ok(source);
                }
                Err(e) if e.is_transient() => {
                    warn!(provider = name, error = %e, "resolver: provider unavailable");
                    slot.set_cooling(Some(Instant::now() + self.cooldown));
                    attempts.push(format!("{}: {}", name, e));
                }
                Err(e) => {
                    debug!(provider = name, "resolver: not found");
                    attempts.push(format!("{}: {}", name, e));
                }
            }
        }

        if attempts.is_empty() {
            attempts.push("no providers configured".to_string());
        }
        Err(StreamError::NoSourceFound(attempts.join("; ")))
    }
}
