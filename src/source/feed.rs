//! RSS/Atom feed source.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use feed_rs::model::Entry;
use futures_util::stream::{self, BoxStream, StreamExt};
use regex::{Regex, RegexBuilder};
use scraper::{Html, Selector};
use tracing::{debug, warn};

use super::resolution::{best_by_resolution, best_with_resolution};
use super::{FinishHook, PathRewrite, ReportOnce, Source, SourceError};
use crate::fetch::Fetch;
use crate::identifier::{Comparator, Identifier};
use crate::manager::sanitize_filename;

/// A feed whose entries carry downloadable enclosures.
///
/// Entries are filtered by title and category, then reduced to one download
/// link each: the highest-resolution enclosure, or failing that the
/// highest-resolution link inside the entry's HTML content.
pub struct FeedSource {
    name: String,
    feed: Identifier,
    fetch: Arc<dyn Fetch>,
    comparator: Comparator,
    title_pattern: Option<Regex>,
    title_prefix: Option<String>,
    skip_categories: Vec<String>,
    rewrite: Option<PathRewrite>,
    save_as_from_title: bool,
    reported: ReportOnce,
    finish: FinishHook,
}

impl FeedSource {
    #[must_use]
    pub fn new(name: impl Into<String>, feed: Identifier, fetch: Arc<dyn Fetch>) -> Self {
        Self {
            name: name.into(),
            feed,
            fetch,
            comparator: Comparator::Exact,
            title_pattern: None,
            title_prefix: None,
            skip_categories: Vec::new(),
            rewrite: None,
            save_as_from_title: false,
            reported: ReportOnce::default(),
            finish: FinishHook::default(),
        }
    }

    #[must_use]
    pub fn with_comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = comparator;
        self
    }

    /// Keeps only entries whose title matches `pattern` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidPattern`] when the pattern does not compile.
    pub fn with_title_pattern(mut self, pattern: &str) -> Result<Self, SourceError> {
        let compiled = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| SourceError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        self.title_pattern = Some(compiled);
        Ok(self)
    }

    /// Keeps only entries whose title starts with `prefix`.
    #[must_use]
    pub fn with_title_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.title_prefix = Some(prefix.into());
        self
    }

    /// Drops entries tagged with any of these categories (case-insensitive).
    #[must_use]
    pub fn with_skip_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.skip_categories = categories
            .into_iter()
            .map(|c| c.as_ref().trim().to_lowercase())
            .collect();
        self
    }

    #[must_use]
    pub fn with_rewrite(mut self, rewrite: PathRewrite) -> Self {
        self.rewrite = Some(rewrite);
        self
    }

    /// Renames purely numeric file names to `"<title> (<stem>)<ext>"`.
    #[must_use]
    pub fn with_save_as_from_title(mut self, enabled: bool) -> Self {
        self.save_as_from_title = enabled;
        self
    }

    #[must_use]
    pub fn with_finish_command(mut self, command: Option<Vec<String>>) -> Self {
        self.finish = FinishHook::new(command);
        self
    }

    async fn candidates(&self) -> Vec<Identifier> {
        let body = match self.feed.open(self.fetch.as_ref()).await {
            Ok(body) => body,
            Err(error) => {
                warn!(source = %self.name, url = %self.feed, error = %error, "Feed unavailable");
                return Vec::new();
            }
        };

        let parsed = match feed_rs::parser::parse(body.as_bytes()) {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(source = %self.name, url = %self.feed, error = %error, "Feed unreadable");
                return Vec::new();
            }
        };

        debug!(source = %self.name, entries = parsed.entries.len(), "Feed fetched");
        parsed
            .entries
            .iter()
            .filter_map(|entry| self.candidate(entry))
            .collect()
    }

    fn candidate(&self, entry: &Entry) -> Option<Identifier> {
        let title = entry
            .title
            .as_ref()
            .map(|t| t.content.trim().to_string())
            .unwrap_or_default();

        if let Some(prefix) = &self.title_prefix
            && !title.starts_with(prefix.as_str())
        {
            return None;
        }
        if let Some(pattern) = &self.title_pattern
            && !pattern.is_match(&title)
        {
            return None;
        }
        if let Some(category) = entry
            .categories
            .iter()
            .map(|c| c.term.trim().to_lowercase())
            .find(|term| self.skip_categories.contains(term))
        {
            if self.reported.first_time(&entry.id) {
                warn!(source = %self.name, title = %title, category = %category, "Skipping entry by category");
            }
            return None;
        }

        let page = entry.links.iter().find(|link| {
            link.rel
                .as_deref()
                .is_none_or(|rel| rel.eq_ignore_ascii_case("alternate"))
        });
        let base = page
            .and_then(|link| self.feed.join(&link.href).ok())
            .unwrap_or_else(|| self.feed.clone());

        let Some(raw) = best_enclosure(entry).or_else(|| best_content_link(entry)) else {
            if self.reported.first_time(&entry.id) {
                warn!(source = %self.name, title = %title, "No download link in entry");
            }
            return None;
        };

        let mut identifier = match base.join(&raw) {
            Ok(identifier) => identifier,
            Err(error) => {
                warn!(source = %self.name, title = %title, error = %error, "Skipping entry");
                return None;
            }
        };
        if let Some(rewrite) = &self.rewrite {
            identifier = rewrite.apply(&identifier);
        }
        if let Some(link) = page {
            identifier = identifier.with_comment(link.href.clone());
        }
        if self.save_as_from_title
            && let Some(save_as) = save_as_from_title(&identifier, &title)
        {
            identifier = identifier.with_save_as(save_as);
        }
        self.finish.claim(&identifier);
        Some(identifier)
    }
}

#[async_trait]
impl Source for FeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn list(&self) -> BoxStream<'_, Identifier> {
        stream::once(self.candidates()).flat_map(stream::iter).boxed()
    }

    fn comparator(&self) -> Comparator {
        self.comparator
    }

    fn download_submitted(&self, _original: &Identifier, resolved: &Identifier) {
        self.finish.claim_submitted(resolved);
    }

    async fn download_finished(&self, identifiers: &[Identifier], path: &Path) {
        self.finish.run(&self.name, identifiers, path).await;
    }
}

impl std::fmt::Debug for FeedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSource")
            .field("name", &self.name)
            .field("feed", &self.feed.as_str())
            .field("comparator", &self.comparator)
            .finish_non_exhaustive()
    }
}

/// Enclosure URLs, from RSS `<enclosure>` (media objects) and Atom `rel="enclosure"` links.
fn best_enclosure(entry: &Entry) -> Option<String> {
    let media = entry
        .media
        .iter()
        .flat_map(|object| object.content.iter())
        .filter_map(|content| content.url.as_ref().map(|url| url.as_str().to_string()));
    let links = entry
        .links
        .iter()
        .filter(|link| {
            link.rel
                .as_deref()
                .is_some_and(|rel| rel.eq_ignore_ascii_case("enclosure"))
        })
        .map(|link| link.href.clone());

    let mut seen = Vec::new();
    for url in media.chain(links) {
        if !seen.contains(&url) {
            seen.push(url);
        }
    }
    best_by_resolution(seen, |url| url.as_str())
}

/// Best link inside the entry's HTML body, judged by its link text.
fn best_content_link(entry: &Entry) -> Option<String> {
    let html = entry
        .content
        .as_ref()
        .and_then(|content| content.body.clone())
        .or_else(|| entry.summary.as_ref().map(|summary| summary.content.clone()))?;
    let anchors = anchors_in(&html);
    best_with_resolution(anchors, |(_, text)| text.as_str()).map(|(href, _)| href)
}

fn anchors_in(html: &str) -> Vec<(String, String)> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_fragment(html);
    document
        .select(&selector)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?.trim().to_string();
            let text = anchor.text().collect::<String>().trim().to_string();
            Some((href, text))
        })
        .collect()
}

fn save_as_from_title(identifier: &Identifier, title: &str) -> Option<String> {
    let stem = identifier.file_stem()?;
    if title.is_empty() || stem.is_empty() || !stem.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let extension = identifier.extension().unwrap_or_default();
    Some(sanitize_filename(&format!("{title} ({stem}){extension}")))
}
