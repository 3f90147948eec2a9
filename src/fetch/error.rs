//! Error types for HTTP fetches.

use thiserror::Error;

use crate::identifier::IdentifierError;

/// Errors raised while talking to a remote host.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Connection-level failure (DNS, refused connection, TLS, broken body).
    #[error("network error fetching {url}: {source}")]
    Request {
        /// The URL being fetched.
        url: String,
        /// The underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The request did not complete within the configured timeout.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL being fetched.
        url: String,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL being fetched.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// A redirect ended on a location that is not a usable identifier.
    #[error("redirect from {url} ended on an unusable location: {source}")]
    Redirect {
        /// The URL that was resolved.
        url: String,
        /// Why the final location was rejected.
        #[source]
        source: IdentifierError,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl NetworkError {
    /// Maps a client error, classifying timeouts separately.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Request { url, source }
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Returns `true` when repeating the same request may succeed.
    ///
    /// | Failure | Transient |
    /// |---------|-----------|
    /// | timeout | yes |
    /// | 408, 429, 5xx | yes |
    /// | other 4xx | no |
    /// | TLS / certificate | no |
    /// | other connection errors | yes |
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::HttpStatus { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            Self::Request { source, .. } => !is_tls_error(source),
            Self::Redirect { .. } | Self::Client { .. } => false,
        }
    }
}

fn is_tls_error(error: &reqwest::Error) -> bool {
    let text = error.to_string().to_lowercase();
    text.contains("certificate")
        || text.contains("tls")
        || text.contains("ssl")
        || text.contains("handshake")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_classification() {
        assert!(NetworkError::http_status("u", 503).is_transient());
        assert!(NetworkError::http_status("u", 429).is_transient());
        assert!(NetworkError::http_status("u", 408).is_transient());
        assert!(!NetworkError::http_status("u", 404).is_transient());
        assert!(!NetworkError::http_status("u", 403).is_transient());
    }

    #[test]
    fn test_timeout_is_transient() {
        assert!(NetworkError::timeout("u").is_transient());
    }

    #[test]
    fn test_redirect_error_is_permanent() {
        let error = NetworkError::Redirect {
            url: "https://example.com".to_string(),
            source: IdentifierError::malformed("x", "bad"),
        };
        assert!(!error.is_transient());
    }

    #[test]
    fn test_display_mentions_url_and_status() {
        let error = NetworkError::http_status("https://example.com/feed", 500);
        assert_eq!(error.to_string(), "HTTP 500 fetching https://example.com/feed");
    }
}
