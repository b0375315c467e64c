//! Adapter registry: identifier → factory mapping populated at startup.

use std::collections::HashMap;

use tracing::debug;

use crate::transport::Transport;

use super::{ScrapeError, Scraper};

/// Factory for one scraper adapter kind.
///
/// A site row stores only the adapter identifier; the factory binds it to
/// the site's base URL and the shared transport at scan time.
pub trait ScraperFactory: Send + Sync {
    /// The registry identifier this factory answers to.
    fn id(&self) -> &'static str;

    /// Creates an adapter instance for one site.
    fn create(&self, base_url: &str, transport: Transport) -> Box<dyn Scraper>;
}

/// Process-wide adapter registry.
///
/// Populated explicitly (build-time registration, a single initialization
/// pass): extensible without touching the engine, and statically
/// verifiable, unlike filesystem plugin discovery.
#[derive(Default)]
pub struct ScraperRegistry {
    factories: HashMap<String, Box<dyn ScraperFactory>>,
}

impl ScraperRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registers a factory under its identifier.
    ///
    /// A later registration with the same identifier replaces the earlier
    /// one (latest wins).
    pub fn register(&mut self, factory: Box<dyn ScraperFactory>) {
        debug!(id = factory.id(), "registering scraper adapter");
        self.factories.insert(factory.id().to_string(), factory);
    }

    /// Returns the registered identifiers, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factories.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns true if an identifier is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Creates an adapter for a site.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::UnknownScraper`] for an unregistered
    /// identifier.
    pub fn create(
        &self,
        id: &str,
        base_url: &str,
        transport: Transport,
    ) -> Result<Box<dyn Scraper>, ScrapeError> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| ScrapeError::UnknownScraper { id: id.to_string() })?;
        Ok(factory.create(base_url, transport))
    }
}
