//! reqwest-backed [`Fetch`] implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::{Client, Response, redirect};
use tracing::{debug, instrument};

use super::retry::RetryPolicy;
use super::user_agent::{UserAgentOverrides, default_user_agent};
use super::{Fetch, NetworkError};
use crate::identifier::Identifier;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default whole-request timeout for pages, feeds and redirect checks.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Default redirect hop limit.
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Construction parameters for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub max_redirects: usize,
    pub retry: RetryPolicy,
    pub user_agents: UserAgentOverrides,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            timeout: DEFAULT_READ_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            retry: RetryPolicy::default(),
            user_agents: UserAgentOverrides::with_builtin(),
        }
    }
}

/// HTTP fetcher with pooled connections.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
    user_agents: Arc<UserAgentOverrides>,
}

impl HttpFetcher {
    /// Builds a fetcher.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Client`] if the TLS backend cannot be initialised.
    pub fn new(settings: FetchSettings) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.timeout)
            .redirect(redirect::Policy::limited(settings.max_redirects))
            .user_agent(default_user_agent())
            .gzip(true)
            .build()
            .map_err(|source| NetworkError::Client { source })?;

        Ok(Self {
            client,
            retry: settings.retry,
            user_agents: Arc::new(settings.user_agents),
        })
    }

    /// Sends a GET and checks the status. The body is left unread.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] on connection failure, timeout, or a
    /// non-success status after redirects.
    pub async fn get(&self, identifier: &Identifier) -> Result<Response, NetworkError> {
        let mut request = self.client.get(identifier.url().clone());
        if let Some(host) = identifier.host()
            && let Some(agent) = self.user_agents.for_host(host)
        {
            request = request.header(USER_AGENT, agent);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NetworkError::network(identifier.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::http_status(
                identifier.as_str(),
                status.as_u16(),
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    #[instrument(skip(self, identifier), fields(url = %identifier))]
    async fn resolve(&self, identifier: &Identifier) -> Result<Identifier, NetworkError> {
        let response = self.get(identifier).await?;
        let location = response.url().as_str().to_string();
        drop(response);

        let mut resolved = Identifier::parse(&location).map_err(|source| NetworkError::Redirect {
            url: identifier.to_string(),
            source,
        })?;
        if let Some(comment) = identifier.comment() {
            resolved = resolved.with_comment(comment);
        }
        debug!(resolved = %resolved, "resolved");
        Ok(resolved)
    }

    #[instrument(skip(self, identifier), fields(url = %identifier))]
    async fn get_text(&self, identifier: &Identifier) -> Result<String, NetworkError> {
        self.retry
            .run(identifier.as_str(), move || async move {
                let response = self.get(identifier).await?;
                response
                    .text()
                    .await
                    .map_err(|e| NetworkError::network(identifier.as_str(), e))
            })
            .await
    }
}
