//! Download sources.
//!
//! A [`Source`] is one content provider polled on a fixed cadence. Every call
//! to [`Source::list`] re-scrapes from scratch and yields candidate
//! identifiers lazily; per-item failures are logged and skipped, and an
//! unreachable feed or page yields nothing for that cycle.
//!
//! Two configurable implementations ship with the crate:
//! - [`FeedSource`] reads RSS/Atom feeds and picks the best enclosure
//! - [`HtmlSource`] scrapes links from a page, optionally following each one

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::identifier::{Comparator, Identifier};

mod feed;
mod html;
mod resolution;

pub use feed::FeedSource;
pub use html::{HtmlSource, LinkSelector};
pub use resolution::{best_by_resolution, best_with_resolution, resolution_of};

/// Errors raised while building a source from configuration.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A CSS selector did not parse.
    #[error("invalid CSS selector '{selector}': {reason}")]
    InvalidSelector {
        /// The rejected selector.
        selector: String,
        /// Parser message.
        reason: String,
    },

    /// A regular expression did not compile.
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
        /// Compiler error.
        #[source]
        source: regex::Error,
    },
}

/// One content provider.
#[async_trait]
pub trait Source: Send + Sync {
    /// Stable name used in logs and for task selection.
    fn name(&self) -> &str;

    /// Candidate identifiers for one poll cycle, yielded in discovery order.
    fn list(&self) -> BoxStream<'_, Identifier>;

    /// Equality strategy used by [`Source::equal`].
    fn comparator(&self) -> Comparator {
        Comparator::Exact
    }

    /// Decides whether `candidate` from the download history is the same
    /// download as the freshly discovered `original` (resolved to `resolved`).
    fn equal(&self, original: &Identifier, resolved: &Identifier, candidate: &Identifier) -> bool {
        let _ = original;
        self.comparator().matches(resolved, candidate)
    }

    /// Called when the download manager accepted `resolved`, discovered by
    /// this source as `original`.
    fn download_submitted(&self, original: &Identifier, resolved: &Identifier) {
        let _ = (original, resolved);
    }

    /// Called once per finished file with every identifier recorded for it.
    ///
    /// Each source sees every finished file and decides once whether it is
    /// its own.
    async fn download_finished(&self, identifiers: &[Identifier], path: &Path) {
        let _ = (identifiers, path);
    }
}

/// Regex path rewrite applied to discovered links (preview to full size).
#[derive(Debug, Clone)]
pub struct PathRewrite {
    pattern: Regex,
    replacement: String,
}

impl PathRewrite {
    /// Compiles the rewrite.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidPattern`] when `pattern` does not compile.
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Result<Self, SourceError> {
        let compiled = Regex::new(pattern).map_err(|source| SourceError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: compiled,
            replacement: replacement.into(),
        })
    }

    /// Returns `identifier` with its path rewritten, or an unchanged clone.
    #[must_use]
    pub fn apply(&self, identifier: &Identifier) -> Identifier {
        let rewritten = self
            .pattern
            .replace_all(identifier.path(), self.replacement.as_str());
        if rewritten == identifier.path() {
            identifier.clone()
        } else {
            identifier.with_path(&rewritten)
        }
    }
}

/// Remembers keys so a recurring condition is only reported once.
#[derive(Debug, Default)]
pub(crate) struct ReportOnce {
    seen: Mutex<HashSet<String>>,
}

impl ReportOnce {
    /// Returns `true` the first time `key` is seen.
    pub(crate) fn first_time(&self, key: &str) -> bool {
        match self.seen.lock() {
            Ok(mut seen) => seen.insert(key.to_string()),
            Err(_) => true,
        }
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.seen.lock().is_ok_and(|seen| seen.contains(key))
    }
}

/// Post-processing for finished downloads.
///
/// A source claims a finished file when its host is one the source itself
/// yielded, or when its URL is one the source had submitted. The optional
/// command runs with the file path appended.
#[derive(Debug, Default)]
pub struct FinishHook {
    hosts: Mutex<HashSet<String>>,
    submitted: Mutex<HashSet<String>>,
    command: Option<Vec<String>>,
}

impl FinishHook {
    #[must_use]
    pub fn new(command: Option<Vec<String>>) -> Self {
        Self {
            hosts: Mutex::new(HashSet::new()),
            submitted: Mutex::new(HashSet::new()),
            command: command.filter(|argv| !argv.is_empty()),
        }
    }

    /// Marks the identifier's host as belonging to the owning source.
    pub fn claim(&self, identifier: &Identifier) {
        if let Some(host) = identifier.host()
            && let Ok(mut hosts) = self.hosts.lock()
        {
            hosts.insert(host.to_string());
        }
    }

    /// Marks the URL handed to the download manager, which may sit on a
    /// host the source never listed.
    pub fn claim_submitted(&self, resolved: &Identifier) {
        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.insert(resolved.as_str().to_string());
        }
    }

    #[must_use]
    pub fn owns(&self, identifier: &Identifier) -> bool {
        let by_host = identifier
            .host()
            .is_some_and(|host| self.hosts.lock().is_ok_and(|hosts| hosts.contains(host)));
        by_host
            || self
                .submitted
                .lock()
                .is_ok_and(|submitted| submitted.contains(identifier.as_str()))
    }

    /// Runs the hook once if any of `identifiers` was claimed.
    pub async fn run(&self, source: &str, identifiers: &[Identifier], path: &Path) {
        let Some(identifier) = identifiers.iter().find(|identifier| self.owns(identifier)) else {
            debug!(source, path = %path.display(), "Finished download belongs to another source");
            return;
        };
        let Some((program, args)) = self.command.as_ref().and_then(|argv| argv.split_first())
        else {
            info!(source, url = %identifier, path = %path.display(), "Download finished");
            return;
        };

        let status = tokio::process::Command::new(program)
            .args(args)
            .arg(path)
            .status()
            .await;
        match status {
            Ok(status) if status.success() => {
                info!(source, path = %path.display(), program, "Post-processed download");
            }
            Ok(status) => {
                warn!(source, path = %path.display(), program, %status, "Post-processing command failed");
            }
            Err(error) => {
                error!(source, path = %path.display(), program, error = %error, "Post-processing command could not start");
            }
        }
    }
}
