//! Download identifiers.
//!
//! An [`Identifier`] is an absolute URL plus the two pieces of metadata a
//! download manager accepts alongside it: a free-text `comment` (usually the
//! page the file was found on) and an optional `save_as` file name.
//!
//! Equality and hashing use the canonical URL string only. Sources that need
//! looser matching pick a [`Comparator`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use url::Url;

use crate::fetch::{Fetch, NetworkError};

mod comparator;
mod error;

pub use comparator::Comparator;
pub use error::IdentifierError;

/// A parsed download URL with optional comment and save-as name.
#[derive(Debug, Clone)]
pub struct Identifier {
    url: Url,
    comment: Option<String>,
    save_as: Option<String>,
}

impl Identifier {
    /// Parses an absolute URL.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::Malformed`] when the text is not an absolute
    /// hierarchical URL (relative references, `mailto:` and friends).
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let trimmed = raw.trim();
        let url = Url::parse(trimmed).map_err(|e| IdentifierError::malformed(trimmed, e))?;
        if url.cannot_be_a_base() {
            return Err(IdentifierError::malformed(
                trimmed,
                "URL has no hierarchical path",
            ));
        }
        Ok(Self::from_url(url))
    }

    /// Parses `raw` relative to this identifier (links found on a page).
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::Malformed`] when the reference cannot be joined.
    pub fn join(&self, raw: &str) -> Result<Self, IdentifierError> {
        let trimmed = raw.trim();
        let url = self
            .url
            .join(trimmed)
            .map_err(|e| IdentifierError::malformed(trimmed, e))?;
        Ok(Self::from_url(url))
    }

    /// Wraps an already parsed URL.
    #[must_use]
    pub fn from_url(url: Url) -> Self {
        Self {
            url,
            comment: None,
            save_as: None,
        }
    }

    /// Canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.url.path()
    }

    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.url.query()
    }

    #[must_use]
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    #[must_use]
    pub fn save_as(&self) -> Option<&str> {
        self.save_as.as_deref()
    }

    /// Percent-decoded final path segment, or `None` for directory URLs.
    #[must_use]
    pub fn file_name(&self) -> Option<String> {
        let last = self.url.path_segments()?.next_back()?;
        if last.is_empty() {
            return None;
        }
        let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
        Some(decoded)
    }

    /// File name without its final extension.
    #[must_use]
    pub fn file_stem(&self) -> Option<String> {
        let name = self.file_name()?;
        match name.rfind('.') {
            Some(pos) if pos > 0 => Some(name[..pos].to_string()),
            _ => Some(name),
        }
    }

    /// Final extension including the leading dot, lowercased.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name()?;
        let pos = name.rfind('.').filter(|pos| *pos > 0)?;
        Some(name[pos..].to_lowercase())
    }

    /// Copy with the path replaced. Comment and save-as are kept.
    #[must_use]
    pub fn with_path(&self, path: &str) -> Self {
        let mut url = self.url.clone();
        url.set_path(path);
        Self {
            url,
            comment: self.comment.clone(),
            save_as: self.save_as.clone(),
        }
    }

    /// Copy with the query replaced by URL-encoded `pairs`.
    ///
    /// An empty iterator removes the query entirely.
    #[must_use]
    pub fn with_query<I, K, V>(&self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut url = self.url.clone();
        url.set_query(None);
        let mut pairs = pairs.into_iter().peekable();
        if pairs.peek().is_some() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Self {
            url,
            comment: self.comment.clone(),
            save_as: self.save_as.clone(),
        }
    }

    /// Copy with the query string and fragment dropped.
    #[must_use]
    pub fn without_query(&self) -> Self {
        let mut url = self.url.clone();
        url.set_query(None);
        url.set_fragment(None);
        Self {
            url,
            comment: self.comment.clone(),
            save_as: self.save_as.clone(),
        }
    }

    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    #[must_use]
    pub fn with_save_as(mut self, save_as: impl Into<String>) -> Self {
        self.save_as = Some(save_as.into());
        self
    }

    /// Follows redirects and returns the final location.
    ///
    /// The result carries this identifier's comment but not its save-as name.
    ///
    /// # Errors
    ///
    /// Propagates the fetcher's [`NetworkError`].
    pub async fn resolve(&self, fetch: &dyn Fetch) -> Result<Self, NetworkError> {
        fetch.resolve(self).await
    }

    /// Fetches the body as text.
    ///
    /// # Errors
    ///
    /// Propagates the fetcher's [`NetworkError`].
    pub async fn open(&self, fetch: &dyn Fetch) -> Result<String, NetworkError> {
        fetch.get_text(self).await
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Identifier {}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
