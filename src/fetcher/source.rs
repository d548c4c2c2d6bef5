//! Document sources a fetcher can pull from

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{FetchError, Result};

/// Something that returns the text of a document for a URL
///
/// [`HttpSource`] is the production implementation; tests and callers with
/// other transports provide their own.
#[async_trait]
pub trait Source: Send + Sync {
    /// Fetches the document at `url`.
    ///
    /// Errors are classified by [`Classify`](crate::retry::Classify) to decide
    /// how the fetcher retries.
    async fn get(&self, url: &str) -> std::result::Result<String, FetchError>;
}

/// HTTP GET source backed by a shared `reqwest` client
#[derive(Clone, Debug)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    /// Builds a client with the given request timeout, certificate policy and
    /// User-Agent.
    ///
    /// # Errors
    /// Returns [`Error::Network`](crate::Error::Network) if the TLS backend
    /// cannot be initialized.
    pub fn new(timeout: Duration, verify_tls: bool, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!verify_tls)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn get(&self, url: &str) -> std::result::Result<String, FetchError> {
        let url = url::Url::parse(url)?;
        let response = self.client.get(url).send().await?;

        // Error pages are still documents; patterns decide what they contain
        let status = response.status();
        if !status.is_success() {
            debug!(status = status.as_u16(), "non-success status, extracting anyway");
        }

        // Decodes with the Content-Type charset, replacing invalid bytes
        Ok(response.text().await?)
    }
}
