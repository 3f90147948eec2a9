//! Video resolution heuristic for picking the best of several links.

use std::sync::LazyLock;

use regex::Regex;

/// `720p`, `1080p`, `2160p`.
#[allow(clippy::expect_used)]
static PROGRESSIVE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{3,4})p").expect("progressive regex is valid"));

/// Bare well-known heights, for names such as `trailer_720.mov`.
#[allow(clippy::expect_used)]
static BARE_HEIGHT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(480|720|1080)").expect("height regex is valid"));

/// Extracts a vertical resolution from free text, or 0 when none is present.
#[must_use]
pub fn resolution_of(text: &str) -> u32 {
    PROGRESSIVE_PATTERN
        .captures(text)
        .or_else(|| BARE_HEIGHT_PATTERN.captures(text))
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Picks the candidate with the highest resolution; ties keep the first seen.
///
/// Returns the first candidate when none carries a resolution.
pub fn best_by_resolution<T, F>(candidates: impl IntoIterator<Item = T>, text_of: F) -> Option<T>
where
    F: Fn(&T) -> &str,
{
    let mut best: Option<(u32, T)> = None;
    for candidate in candidates {
        let resolution = resolution_of(text_of(&candidate));
        match &best {
            Some((current, _)) if *current >= resolution => {}
            _ => best = Some((resolution, candidate)),
        }
    }
    best.map(|(_, candidate)| candidate)
}

/// Like [`best_by_resolution`] but ignores candidates without a resolution.
pub fn best_with_resolution<T, F>(
    candidates: impl IntoIterator<Item = T>,
    text_of: F,
) -> Option<T>
where
    F: Fn(&T) -> &str,
{
    let mut best: Option<(u32, T)> = None;
    for candidate in candidates {
        let resolution = resolution_of(text_of(&candidate));
        let current = best.as_ref().map_or(0, |(value, _)| *value);
        if resolution > current {
            best = Some((resolution, candidate));
        }
    }
    best.map(|(_, candidate)| candidate)
}
