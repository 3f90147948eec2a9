//! Remote access for identifiers: redirect resolution and text fetches.
//!
//! [`Fetch`] is the seam the rest of the crate talks to; [`HttpFetcher`] is
//! the reqwest-backed implementation. Tests substitute in-memory fetchers.

use async_trait::async_trait;

use crate::identifier::Identifier;

mod error;
mod http;
mod retry;
mod user_agent;

pub use error::NetworkError;
pub use http::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_REDIRECTS, DEFAULT_READ_TIMEOUT, FetchSettings, HttpFetcher,
};
pub use retry::{DEFAULT_FETCH_ATTEMPTS, RetryPolicy};
pub use user_agent::{BUILTIN_USER_AGENT_OVERRIDES, UserAgentOverrides, default_user_agent};

/// Network operations on identifiers.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Follows redirects and returns the final location.
    ///
    /// The result keeps the input's comment. One attempt only; callers decide
    /// whether a failure is worth repeating on the next cycle.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] when the host is unreachable, times out, or
    /// answers with an error status.
    async fn resolve(&self, identifier: &Identifier) -> Result<Identifier, NetworkError>;

    /// Fetches the body as text (feeds, index pages).
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] once retries are exhausted.
    async fn get_text(&self, identifier: &Identifier) -> Result<String, NetworkError>;
}
