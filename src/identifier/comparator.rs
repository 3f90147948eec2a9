//! Equality strategies used when matching a candidate against the download history.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use super::Identifier;

/// How two identifiers are compared for "same download" purposes.
///
/// Sources pick one of these; the registry never compares raw strings itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Comparator {
    /// Full canonical URL string.
    #[default]
    Exact,
    /// Path only; hosts may differ (mirrors, CDNs).
    Path,
    /// Final path segment only.
    Basename,
    /// Final path segment without its extension.
    Stem,
    /// Full URL with the query string dropped.
    NoQuery,
}

impl Comparator {
    /// Returns `true` when `a` and `b` denote the same download.
    ///
    /// File-name based strategies fall back to exact comparison when either
    /// side has no final path segment, so `https://host/` never matches
    /// every other root URL.
    #[must_use]
    pub fn matches(self, a: &Identifier, b: &Identifier) -> bool {
        match self {
            Self::Exact => a == b,
            Self::Path => a.path() == b.path(),
            Self::Basename => match (a.file_name(), b.file_name()) {
                (Some(left), Some(right)) => left == right,
                _ => a == b,
            },
            Self::Stem => match (a.file_stem(), b.file_stem()) {
                (Some(left), Some(right)) => left == right,
                _ => a == b,
            },
            Self::NoQuery => a.without_query() == b.without_query(),
        }
    }

    /// Returns the stable label used in config files.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Path => "path",
            Self::Basename => "basename",
            Self::Stem => "stem",
            Self::NoQuery => "no-query",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Comparator {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "path" => Ok(Self::Path),
            "basename" => Ok(Self::Basename),
            "stem" => Ok(Self::Stem),
            "no-query" | "no_query" => Ok(Self::NoQuery),
            other => Err(format!(
                "unknown comparator '{other}' (expected exact, path, basename, stem, no-query)"
            )),
        }
    }
}
