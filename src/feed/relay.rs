//! Feed fetching through the CORS relay.
//!
//! Browsers can't fetch arbitrary feed XML cross-origin, so the original
//! deployment routes every request through a small relay that echoes the
//! feed body back with permissive headers. The relay contract is
//! `GET {relay_url}{feed_url}` with fixed `Origin` and `Usage` headers;
//! feeds marked `noCorsProxy` are fetched directly.

use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use crate::store::document::FeedConfig;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors from fetching one feed. These never crash a session — they are
/// captured into its error state.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the 30-second timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// HTTP client for the relay. Cheap to clone; the inner `reqwest::Client`
/// is already reference counted.
#[derive(Debug, Clone)]
pub struct RelayClient {
    client: reqwest::Client,
    relay_url: String,
    origin: String,
    usage: String,
}

impl RelayClient {
    pub fn new(
        client: reqwest::Client,
        relay_url: impl Into<String>,
        origin: impl Into<String>,
        usage: impl Into<String>,
    ) -> Self {
        Self {
            client,
            relay_url: relay_url.into(),
            origin: origin.into(),
            usage: usage.into(),
        }
    }

    /// Fetches a feed's raw XML, through the relay unless the feed opts
    /// out.
    pub async fn fetch_feed(&self, feed: &FeedConfig) -> Result<String, RelayError> {
        let url = if feed.no_cors_proxy == Some(true) {
            feed.url.clone()
        } else {
            format!("{}{}", self.relay_url, feed.url)
        };

        let request = self
            .client
            .get(&url)
            .header("Origin", &self.origin)
            .header("Usage", &self.usage);

        let response = tokio::time::timeout(FETCH_TIMEOUT, request.send())
            .await
            .map_err(|_| RelayError::Timeout)?
            .map_err(RelayError::Network)?;

        if !response.status().is_success() {
            return Err(RelayError::HttpStatus(response.status().as_u16()));
        }

        let bytes = read_limited_bytes(response, MAX_FEED_SIZE).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, RelayError> {
    // Fast path: trust Content-Length when present
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(RelayError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(RelayError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(RelayError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
