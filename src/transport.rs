//! Shared HTTP transport for scrapers and the download engine.
//!
//! A single [`Transport`] owns the configured proxy, user-agent, and
//! timeouts. Scraper adapters fetch catalog pages through it and the
//! download engine streams file bodies through it; neither manages
//! connections directly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, ClientBuilder, Proxy};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};
use url::Url;

/// Default connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default read timeout in seconds (generous for large file bodies).
const READ_TIMEOUT_SECS: u64 = 300;

/// Default User-Agent sent with every request.
const DEFAULT_USER_AGENT: &str = concat!("shelfsync/", env!("CARGO_PKG_VERSION"));

/// Errors produced by transport operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport could not be constructed (bad proxy URL, TLS init).
    #[error("transport configuration error: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },

    /// Network-level error (DNS resolution, connection refused, TLS).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (429 responses).
        retry_after: Option<String>,
    },

    /// File system error while writing a downloaded body.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Received fewer bytes than the server's declared Content-Length.
    #[error("truncated body for {url}: expected {expected} bytes, got {actual}")]
    Truncated {
        /// The URL being downloaded.
        url: String,
        /// Declared Content-Length.
        expected: u64,
        /// Bytes actually received.
        actual: u64,
    },

    /// The transfer was cancelled by the operator.
    #[error("transfer cancelled: {url}")]
    Cancelled {
        /// The URL being downloaded.
        url: String,
    },
}

impl FetchError {
    fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.to_string() }
        } else {
            Self::Network {
                url: url.to_string(),
                source,
            }
        }
    }
}

/// Transport configuration: the knobs §6 routes from settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Optional HTTP(S) proxy URL applied to all requests.
    pub proxy: Option<String>,
    /// User-Agent header value.
    pub user_agent: String,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Per-request read timeout.
    pub read_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
        }
    }
}

/// Outcome of a streamed body download.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    /// Bytes written to the destination.
    pub bytes_written: u64,
    /// Declared Content-Length, when the server sent one.
    pub content_length: Option<u64>,
}

/// Shared HTTP client wrapper.
///
/// Created once at startup and passed to every component that talks to the
/// network. Cloning is cheap (the inner client is reference-counted).
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
}

impl Transport {
    /// Builds a transport from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] for an unparseable proxy URL or a
    /// client build failure.
    #[instrument(skip(config), fields(proxy = config.proxy.is_some()))]
    pub fn new(config: &TransportConfig) -> Result<Self, FetchError> {
        let mut builder = ClientBuilder::new()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .gzip(true);

        if let Some(proxy_url) = &config.proxy {
            let proxy = Proxy::all(proxy_url).map_err(|e| FetchError::Config {
                message: format!("invalid proxy {proxy_url}: {e}"),
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(|e| FetchError::Config {
            message: format!("failed to build HTTP client: {e}"),
        })?;

        Ok(Self { client })
    }

    /// Builds a transport with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Config`] if the client cannot be built.
    pub fn with_defaults() -> Result<Self, FetchError> {
        Self::new(&TransportConfig::default())
    }

    /// Fetches a page body as text (catalog HTML/JSON for scrapers).
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidUrl`], [`FetchError::Network`],
    /// [`FetchError::Timeout`], or [`FetchError::HttpStatus`].
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl { url: url.to_string() })?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(&response);
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                retry_after,
            });
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))
    }

    /// Streams a file body to `dest`, honoring cooperative cancellation
    /// between chunks.
    ///
    /// The caller chooses a temporary destination; this method never renames
    /// or deletes. On any error (including cancellation) the partially
    /// written file is left for the caller to discard.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Cancelled`] when the cancel signal fires
    /// mid-stream, [`FetchError::Truncated`] when the body ends short of the
    /// declared Content-Length, and the usual network/IO variants otherwise.
    #[instrument(skip(self, cancel), fields(url = %url, dest = %dest.display()))]
    pub async fn download_to_path(
        &self,
        url: &str,
        dest: &Path,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<FetchedBody, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl { url: url.to_string() })?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_header(&response);
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                retry_after,
            });
        }

        let content_length = response.content_length();

        let file = File::create(dest).await.map_err(|e| FetchError::Io {
            path: dest.to_path_buf(),
            source: e,
        })?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;
        let mut cancel_open = true;

        loop {
            if *cancel.borrow() {
                debug!(url = %url, "transfer cancelled mid-stream");
                return Err(FetchError::Cancelled { url: url.to_string() });
            }

            let chunk = if cancel_open {
                tokio::select! {
                    biased;
                    changed = cancel.changed() => {
                        // A closed sender means cancellation can no longer
                        // arrive; stop polling for it.
                        if changed.is_err() {
                            cancel_open = false;
                        }
                        continue;
                    }
                    chunk = stream.next() => chunk,
                }
            } else {
                stream.next().await
            };

            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| FetchError::from_reqwest(url, e))?;
            writer.write_all(&chunk).await.map_err(|e| FetchError::Io {
                path: dest.to_path_buf(),
                source: e,
            })?;
            bytes_written += chunk.len() as u64;
        }

        writer.flush().await.map_err(|e| FetchError::Io {
            path: dest.to_path_buf(),
            source: e,
        })?;

        if let Some(expected) = content_length {
            if bytes_written != expected {
                warn!(url = %url, expected, actual = bytes_written, "short body");
                return Err(FetchError::Truncated {
                    url: url.to_string(),
                    expected,
                    actual: bytes_written,
                });
            }
        }

        Ok(FetchedBody {
            bytes_written,
            content_length,
        })
    }
}

fn retry_after_header(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_default_config_builds() {
        let transport = Transport::with_defaults();
        assert!(transport.is_ok());
    }

    #[test]
    fn test_transport_invalid_proxy_rejected() {
        let config = TransportConfig {
            proxy: Some("::not a proxy::".to_string()),
            ..TransportConfig::default()
        };
        let result = Transport::new(&config);
        assert!(matches!(result, Err(FetchError::Config { .. })));
    }

    #[tokio::test]
    async fn test_fetch_text_invalid_url() {
        let transport = Transport::with_defaults().unwrap();
        let result = transport.fetch_text("not-a-url").await;
        assert!(matches!(result, Err(FetchError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_download_invalid_url() {
        let transport = Transport::with_defaults().unwrap();
        let (_tx, mut rx) = watch::channel(false);
        let temp = tempfile::tempdir().unwrap();
        let result = transport
            .download_to_path("not-a-url", &temp.path().join("x.bin"), &mut rx)
            .await;
        assert!(matches!(result, Err(FetchError::InvalidUrl { .. })));
    }

    #[test]
    fn test_fetch_error_display_includes_context() {
        let err = FetchError::HttpStatus {
            url: "https://a.example/f.pdf".to_string(),
            status: 503,
            retry_after: None,
        };
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("https://a.example/f.pdf"));

        let err = FetchError::Truncated {
            url: "https://a.example/f.pdf".to_string(),
            expected: 100,
            actual: 40,
        };
        assert!(err.to_string().contains("expected 100"));
    }
}
