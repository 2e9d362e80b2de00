//! Title/artist normalization and similarity scoring.
//!
//! Providers return catalog metadata that rarely matches the query verbatim
//! ("Song A (Remastered 2011)", "Artist X & Artist Y"). Candidates are
//! compared on normalized text using the Sørensen–Dice coefficient over
//! character bigrams, which tolerates punctuation, casing and small
//! suffixes without accepting unrelated tracks.

use std::collections::HashMap;

use crate::types::{TrackMetadata, TrackQuery};

/// Weight of the title in the combined score; artists take the rest.
const TITLE_WEIGHT: f64 = 0.6;

/// Maximum tolerated length difference when both sides know the duration.
pub const DURATION_TOLERANCE_SECS: u32 = 10;

/// Lowercases, drops bracketed suffixes and collapses non-alphanumerics.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            c if c.is_alphanumeric() => out.extend(c.to_lowercase()),
            _ => out.push(' '),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical artist string: normalized names, sorted, joined.
pub fn normalize_artists(artists: &[String]) -> String {
    let mut names: Vec<String> = artists
        .iter()
        .map(|a| normalize(a))
        .filter(|a| !a.is_empty())
        .collect();
    names.sort();
    names.dedup();
    names.join(" ")
}

/// Normalized external id (ISRCs are case-insensitive and often hyphenated).
pub fn normalize_external_id(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn bigrams(text: &str) -> HashMap<(char, char), usize> {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    let mut grams = HashMap::new();
    for pair in chars.windows(2) {
        *grams.entry((pair[0], pair[1])).or_insert(0) += 1;
    }
    grams
}

/// Dice similarity of two strings after normalization, in `0.0..=1.0`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize(a), normalize(b));
    if a == b {
        return if a.is_empty() { 0.0 } else { 1.0 };
    }

    let (ga, gb) = (bigrams(&a), bigrams(&b));
    let total: usize = ga.values().sum::<usize>() + gb.values().sum::<usize>();
    if total == 0 {
        return 0.0;
    }

    let shared: usize = ga
        .iter()
        .map(|(gram, n)| gb.get(gram).map_or(0, |m| (*n).min(*m)))
        .sum();
    (2 * shared) as f64 / total as f64
}

/// Whether both sides carry the same external id.
pub fn external_id_matches(query: &TrackQuery, candidate: &TrackMetadata) -> bool {
    match (&query.external_id, &candidate.external_id) {
        (Some(q), Some(c)) => {
            let q = normalize_external_id(q);
            !q.is_empty() && q == normalize_external_id(c)
        }
        _ => false,
    }
}

/// Combined title/artist score of a candidate against a query.
///
/// A query without artists is scored on the title alone.
pub fn score(query: &TrackQuery, candidate: &TrackMetadata) -> f64 {
    let title = similarity(&query.title, &candidate.title);
    let query_artists = normalize_artists(&query.artists);
    if query_artists.is_empty() {
        return title;
    }

    let artists = similarity(&query_artists, &normalize_artists(&candidate.artists));
    TITLE_WEIGHT * title + (1.0 - TITLE_WEIGHT) * artists
}

/// Whether the candidate's duration is compatible with the query's hint.
pub fn duration_compatible(query: &TrackQuery, candidate: &TrackMetadata) -> bool {
    match (query.duration_hint, candidate.duration) {
        (Some(q), Some(c)) => q.abs_diff(c) <= DURATION_TOLERANCE_SECS,
        _ => true,
    }
}

/// Match policy: exact external id wins, otherwise a fuzzy match above the floor.
pub fn accepts(query: &TrackQuery, candidate: &TrackMetadata, floor: f64) -> bool {
    if external_id_matches(query, candidate) {
        return true;
    }
    duration_compatible(query, candidate) && score(query, candidate) >= floor
}

/// Picks the best candidate: an external id hit first, else the highest score.
pub fn best_candidate<'a, T>(
    query: &TrackQuery,
    candidates: &'a [T],
    metadata: impl Fn(&T) -> TrackMetadata,
) -> Option<&'a T> {
    if let Some(hit) = candidates
        .iter()
        .find(|c| external_id_matches(query, &metadata(*c)))
    {
        return Some(hit);
    }

    candidates
        .iter()
        .map(|c| (score(query, &metadata(c)), c))
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, c)| c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_brackets_and_punctuation() {
        assert_eq!(normalize("Song A (Remastered 2011)"), "song a");
        assert_eq!(normalize("  Don't   Stop [Live] "), "don t stop");
    }

    #[test]
    fn artists_are_order_insensitive() {
        let a = normalize_artists(&["Beta".into(), "alpha".into()]);
        let b = normalize_artists(&["ALPHA".into(), "beta".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn isrc_normalization() {
        assert_eq!(normalize_external_id("us-abc-12-34567"), "USABC1234567");
    }
}
