//! Scraper adapters: site-specific catalog discovery.
//!
//! A scraper turns one remote site's page structure into category and file
//! descriptors, and resolves a file reference to its final download URL.
//! Adapters are registered by string identifier in a [`ScraperRegistry`]
//! populated explicitly at startup; an unknown identifier fails a scan with
//! [`ScrapeError::UnknownScraper`] instead of crashing it.
//!
//! # Architecture
//!
//! - [`Scraper`] - async trait each site adapter implements
//! - [`ScraperRegistry`] - identifier → factory mapping
//! - [`LinkListScraper`] - builtin adapter for plain link-index pages
//! - [`CategoryDescriptor`] / [`FileDescriptor`] - scan output records
//!
//! All network access funnels through the shared [`Transport`]; adapters
//! never construct their own clients.

mod error;
mod link_list;
mod registry;

pub use error::ScrapeError;
pub use link_list::LinkListScraper;
pub use registry::{ScraperFactory, ScraperRegistry};

use async_trait::async_trait;

use crate::transport::Transport;

/// A category discovered on a remote site.
///
/// `ref_id` and `parent_ref` are scraper-local identifiers (typically
/// URLs); the store assigns real ids at upsert time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryDescriptor {
    /// Scraper-local identifier for this category.
    pub ref_id: String,
    /// Display name.
    pub name: String,
    /// Remote URL of the category listing.
    pub url: String,
    /// Scraper-local identifier of the parent category, if any.
    pub parent_ref: Option<String>,
}

/// A file advertised in a category listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Scraper-local identifier for this file (resolvable to a URL).
    pub ref_id: String,
    /// Display name (usually the remote filename).
    pub name: String,
    /// Source URL.
    pub url: String,
    /// Remote byte size, when the catalog reports one.
    pub size: Option<u64>,
    /// File-type tag inferred from the listing.
    pub file_type: String,
    /// The category this file was listed under.
    pub category_ref: String,
}

/// Capability set implemented once per supported site.
///
/// # Object Safety
///
/// Uses `async_trait` to support `Box<dyn Scraper>` dispatch from the
/// registry; Rust 2024 native async traits are not object-safe.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Returns the adapter's registry identifier.
    fn id(&self) -> &str;

    /// Discovers the site's categories.
    ///
    /// Must be idempotent: repeated calls against an unchanged site return
    /// the same descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Transport`] on network failure or
    /// [`ScrapeError::Parse`] when the site structure no longer matches.
    async fn discover_categories(&self) -> Result<Vec<CategoryDescriptor>, ScrapeError>;

    /// Lists the files in one category.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Scraper::discover_categories`], plus
    /// [`ScrapeError::NotFound`] for a stale category reference.
    async fn list_files(&self, category_ref: &str) -> Result<Vec<FileDescriptor>, ScrapeError>;

    /// Resolves a file reference to its final download URL.
    ///
    /// May require an additional request (detail page, redirect).
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::NotFound`] when the reference is stale.
    async fn resolve_download_url(&self, file_ref: &str) -> Result<String, ScrapeError>;
}

/// Builds the default registry used by CLI execution flows.
///
/// Registration is explicit and happens once at startup; there is no
/// filesystem plugin discovery.
#[must_use]
pub fn build_default_scraper_registry() -> ScraperRegistry {
    let mut registry = ScraperRegistry::new();
    registry.register(Box::new(link_list::LinkListFactory));
    registry
}

/// Convenience wrapper: builds the default registry and creates an adapter.
///
/// # Errors
///
/// Returns [`ScrapeError::UnknownScraper`] for an unregistered identifier.
pub fn create_scraper(
    registry: &ScraperRegistry,
    scraper_id: &str,
    base_url: &str,
    transport: Transport,
) -> Result<Box<dyn Scraper>, ScrapeError> {
    registry.create(scraper_id, base_url, transport)
}
