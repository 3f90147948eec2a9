//! HTML page-scraping source.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use scraper::{Html, Selector};
use tracing::{debug, warn};

use super::resolution::best_by_resolution;
use super::{FinishHook, PathRewrite, ReportOnce, Source, SourceError};
use crate::fetch::Fetch;
use crate::identifier::{Comparator, Identifier};

/// CSS selector plus the attribute holding the link.
#[derive(Debug, Clone)]
pub struct LinkSelector {
    css: String,
    selector: Selector,
    attribute: String,
}

impl LinkSelector {
    /// Parses `css`; links are read from `attribute` (usually `href`).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidSelector`] when `css` does not parse.
    pub fn new(css: &str, attribute: impl Into<String>) -> Result<Self, SourceError> {
        let selector = Selector::parse(css).map_err(|e| SourceError::InvalidSelector {
            selector: css.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            css: css.to_string(),
            selector,
            attribute: attribute.into(),
        })
    }

    #[must_use]
    pub fn css(&self) -> &str {
        &self.css
    }

    /// Matching `(link, label)` pairs in document order; label is the element text.
    fn extract(&self, html: &str) -> Vec<LinkCandidate> {
        let document = Html::parse_document(html);
        document
            .select(&self.selector)
            .filter_map(|element| {
                let link = element.value().attr(&self.attribute)?.trim();
                if link.is_empty() {
                    return None;
                }
                let text = element.text().collect::<String>();
                Some(LinkCandidate {
                    link: link.to_string(),
                    label: format!("{} {link}", text.trim()),
                })
            })
            .collect()
    }
}

#[derive(Debug)]
struct LinkCandidate {
    link: String,
    label: String,
}

/// Links scraped from an index page.
///
/// With a follow selector each index link is treated as a detail page that is
/// fetched lazily, one at a time, to find the actual download link. Detail
/// pages that fail permanently are remembered and not fetched again.
pub struct HtmlSource {
    name: String,
    page: Identifier,
    fetch: Arc<dyn Fetch>,
    comparator: Comparator,
    links: LinkSelector,
    follow: Option<LinkSelector>,
    rewrite: Option<PathRewrite>,
    unavailable: ReportOnce,
    finish: FinishHook,
}

impl HtmlSource {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        page: Identifier,
        links: LinkSelector,
        fetch: Arc<dyn Fetch>,
    ) -> Self {
        Self {
            name: name.into(),
            page,
            fetch,
            comparator: Comparator::Exact,
            links,
            follow: None,
            rewrite: None,
            unavailable: ReportOnce::default(),
            finish: FinishHook::default(),
        }
    }

    #[must_use]
    pub fn with_comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = comparator;
        self
    }

    #[must_use]
    pub fn with_follow(mut self, follow: LinkSelector) -> Self {
        self.follow = Some(follow);
        self
    }

    #[must_use]
    pub fn with_rewrite(mut self, rewrite: PathRewrite) -> Self {
        self.rewrite = Some(rewrite);
        self
    }

    #[must_use]
    pub fn with_finish_command(mut self, command: Option<Vec<String>>) -> Self {
        self.finish = FinishHook::new(command);
        self
    }

    async fn index_links(&self) -> Vec<Identifier> {
        let body = match self.page.open(self.fetch.as_ref()).await {
            Ok(body) => body,
            Err(error) => {
                warn!(source = %self.name, url = %self.page, error = %error, "Page unavailable");
                return Vec::new();
            }
        };

        let mut links: Vec<Identifier> = Vec::new();
        for candidate in self.links.extract(&body) {
            match self.page.join(&candidate.link) {
                Ok(link) if !links.contains(&link) => links.push(link),
                Ok(_) => {}
                Err(error) => {
                    warn!(source = %self.name, link = %candidate.link, error = %error, "Skipping link");
                }
            }
        }
        debug!(source = %self.name, links = links.len(), selector = self.links.css(), "Page scraped");
        links
    }

    async fn expand(&self, link: Identifier) -> Option<Identifier> {
        let Some(follow) = &self.follow else {
            return Some(self.finish_candidate(link, &self.page));
        };
        if self.unavailable.contains(link.as_str()) {
            debug!(source = %self.name, url = %link, "Skipping unavailable page");
            return None;
        }

        let body = match link.open(self.fetch.as_ref()).await {
            Ok(body) => body,
            Err(error) => {
                warn!(source = %self.name, url = %link, error = %error, "Detail page unavailable");
                if !error.is_transient() {
                    self.unavailable.first_time(link.as_str());
                }
                return None;
            }
        };

        let candidates = follow.extract(&body);
        let Some(best) = best_by_resolution(candidates, |c| c.label.as_str()) else {
            warn!(source = %self.name, url = %link, selector = follow.css(), "No download link on page");
            self.unavailable.first_time(link.as_str());
            return None;
        };

        match link.join(&best.link) {
            Ok(target) => Some(self.finish_candidate(target, &link)),
            Err(error) => {
                warn!(source = %self.name, url = %link, error = %error, "Skipping download link");
                None
            }
        }
    }

    fn finish_candidate(&self, target: Identifier, page: &Identifier) -> Identifier {
        let target = match &self.rewrite {
            Some(rewrite) => rewrite.apply(&target),
            None => target,
        };
        let target = target.with_comment(page.as_str());
        self.finish.claim(&target);
        target
    }
}

#[async_trait]
impl Source for HtmlSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn list(&self) -> BoxStream<'_, Identifier> {
        stream::once(self.index_links())
            .flat_map(stream::iter)
            .filter_map(move |link| self.expand(link))
            .boxed()
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

impl std::fmt::Debug for HtmlSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HtmlSource")
            .field("name", &self.name)
            .field("page", &self.page.as_str())
            .field("links", &self.links.css())
            .field("follow", &self.follow.as_ref().map(LinkSelector::css))
            .finish_non_exhaustive()
    }
}
