//! Error types for identifier parsing.

use thiserror::Error;

/// Errors raised while turning text into an [`Identifier`](super::Identifier).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    /// The text cannot be decomposed into URL components.
    #[error("malformed URL '{raw}': {reason}")]
    Malformed {
        /// The rejected input.
        raw: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl IdentifierError {
    /// Creates a malformed-URL error.
    #[must_use]
    pub fn malformed(raw: impl Into<String>, reason: impl ToString) -> Self {
        Self::Malformed {
            raw: raw.into(),
            reason: reason.to_string(),
        }
    }
}
