use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use crate::shutdown::Shutdown;
use crate::util::{validate_url, UrlValidationError};

/// Default bound on a whole request, connect to last body byte
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
pub const DEFAULT_USER_AGENT: &str = concat!("gator/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur while fetching a feed document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The feed URL is not a well-formed absolute http(s) URL
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Network-level error (DNS, connection refused, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// The configured timeout elapsed before the body was read
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Shutdown fired while the request was in flight
    #[error("Fetch cancelled")]
    Cancelled,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Settings for [`FeedFetcher`].
#[derive(Debug, Clone)]
pub struct FetcherOptions {
    pub timeout: Duration,
    pub user_agent: String,
    pub max_feed_size: usize,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_feed_size: DEFAULT_MAX_FEED_SIZE,
        }
    }
}

/// HTTP client for feed documents.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_feed_size: usize,
}

impl FeedFetcher {
    pub fn new(options: &FetcherOptions) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(options.user_agent.as_str())
            .connect_timeout(options.timeout)
            .build()?;

        Ok(Self {
            client,
            timeout: options.timeout,
            max_feed_size: options.max_feed_size,
        })
    }

    /// Fetches the raw feed document at `url`.
    ///
    /// The request is raced against both the configured timeout and
    /// `shutdown`; whichever fires first wins. A cancelled fetch always
    /// reports [`FetchError::Cancelled`], never a network error.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] - `url` is not an absolute http(s) URL
    /// - [`FetchError::Network`] - Connection, DNS or TLS errors
    /// - [`FetchError::Timeout`] - The configured timeout elapsed
    /// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
    /// - [`FetchError::Cancelled`] - `shutdown` fired first
    /// - [`FetchError::ResponseTooLarge`] - Body exceeded the size limit
    /// - [`FetchError::IncompleteResponse`] - Body shorter than Content-Length
    pub async fn fetch(&self, url: &str, shutdown: &Shutdown) -> Result<Vec<u8>, FetchError> {
        let url = validate_url(url)?;
        if shutdown.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        let request = async {
            let response = self.client.get(url.clone()).send().await?;

            if !response.status().is_success() {
                return Err(FetchError::HttpStatus(response.status().as_u16()));
            }

            read_limited_bytes(response, self.max_feed_size).await
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::debug!(feed = %url, "Fetch cancelled by shutdown");
                Err(FetchError::Cancelled)
            }
            result = tokio::time::timeout(self.timeout, request) => {
                result.map_err(|_| FetchError::Timeout(self.timeout))?
            }
        }
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
