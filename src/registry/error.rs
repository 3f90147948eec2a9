//! Error types for the download registry.

use thiserror::Error;

use crate::fetch::NetworkError;
use crate::manager::ManagerError;

/// Errors raised by [`DownloadRegistry`](super::DownloadRegistry).
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The download manager's history could not be read. Nothing is known
    /// about past downloads, so submitting now could duplicate one.
    #[error("download registry unavailable: {source}")]
    Unavailable {
        /// Underlying manager failure.
        #[source]
        source: ManagerError,
    },

    /// The manager refused or failed a submission.
    #[error("failed to submit {url}: {source}")]
    Submission {
        /// URL that was being submitted.
        url: String,
        /// Underlying manager failure.
        #[source]
        source: ManagerError,
    },

    /// The identifier could not be resolved before checking it.
    #[error("could not resolve {url}: {source}")]
    Resolve {
        /// URL being resolved.
        url: String,
        /// Underlying network failure.
        #[source]
        source: NetworkError,
    },
}

impl RegistryError {
    pub fn unavailable(source: ManagerError) -> Self {
        Self::Unavailable { source }
    }

    pub fn submission(url: impl Into<String>, source: ManagerError) -> Self {
        Self::Submission {
            url: url.into(),
            source,
        }
    }

    pub fn resolve(url: impl Into<String>, source: NetworkError) -> Self {
        Self::Resolve {
            url: url.into(),
            source,
        }
    }
}
