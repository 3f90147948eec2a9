//! Error types for download manager clients.

use std::path::PathBuf;

use thiserror::Error;

use crate::db::DbError;
use crate::fetch::NetworkError;

/// Errors reported by a download manager client or its worker.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The manager cannot be reached or queried at all.
    #[error("download manager unavailable: {reason}")]
    Unavailable {
        /// What went wrong.
        reason: String,
    },

    /// The manager refused a submission.
    #[error("download manager rejected {url}: {reason}")]
    Rejected {
        /// The submitted URL.
        url: String,
        /// Why it was refused.
        reason: String,
    },

    /// The worker that owns the client has shut down.
    #[error("download manager worker has stopped")]
    Disconnected,

    /// Fetching the file itself failed.
    #[error("transfer of {url} failed: {source}")]
    Transfer {
        /// The URL being downloaded.
        url: String,
        /// Underlying network failure.
        #[source]
        source: NetworkError,
    },

    /// Download history storage failed.
    #[error("download history error: {0}")]
    History(#[from] DbError),

    /// Local file system failure while storing a download.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path being written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl ManagerError {
    pub fn unavailable(reason: impl ToString) -> Self {
        Self::Unavailable {
            reason: reason.to_string(),
        }
    }

    pub fn rejected(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Rejected {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
