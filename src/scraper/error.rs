//! Error types for scraper adapters and the adapter registry.

use thiserror::Error;

use crate::transport::FetchError;

/// Errors that can occur while scraping a remote catalog.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Network-level failure reaching the site. Retryable.
    #[error("transport failure: {0}")]
    Transport(#[from] FetchError),

    /// The site's structure no longer matches what the adapter expects.
    /// Not retryable; surfaced to the operator.
    #[error("parse failure at {url}: {message}")]
    Parse {
        /// The page that failed to parse.
        url: String,
        /// What was expected and not found.
        message: String,
    },

    /// A category or file reference is stale (the remote no longer knows it).
    #[error("remote reference not found: {reference}")]
    NotFound {
        /// The stale identifier.
        reference: String,
    },

    /// No adapter is registered under the requested identifier.
    #[error("unknown scraper adapter: {id}")]
    UnknownScraper {
        /// The unrecognized registry key.
        id: String,
    },
}

impl ScrapeError {
    /// Creates a parse error.
    pub fn parse(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a stale-reference error.
    pub fn not_found(reference: impl Into<String>) -> Self {
        Self::NotFound {
            reference: reference.into(),
        }
    }

    /// Returns true when the failure is transport-class and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
