//! Builtin adapter for plain link-index pages.
//!
//! Many small archives are just a page of anchor links to files. This
//! adapter exposes that shape: one default category, files discovered by
//! scanning hrefs whose extension maps to a known file type. File
//! references are already download URLs, so resolution is a passthrough.

use std::collections::HashSet;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, instrument};
use url::Url;

use crate::transport::Transport;
use crate::validate::file_type_for_path;

use super::{CategoryDescriptor, FileDescriptor, ScrapeError, Scraper, ScraperFactory};

/// Registry identifier for this adapter.
pub const LINK_LIST_ID: &str = "link-list";

/// The single category a link-index page exposes.
const DEFAULT_CATEGORY_REF: &str = "default";

fn href_regex() -> &'static Regex {
    static HREF_RE: OnceLock<Regex> = OnceLock::new();
    HREF_RE.get_or_init(|| {
        // Anchor hrefs, excluding in-page fragments. The pattern is a
        // compile-time constant.
        #[allow(clippy::unwrap_used)]
        let re = Regex::new(r#"(?i)href\s*=\s*["']([^"'#]+)["']"#).unwrap();
        re
    })
}

/// Factory registered under [`LINK_LIST_ID`].
pub struct LinkListFactory;

impl ScraperFactory for LinkListFactory {
    fn id(&self) -> &'static str {
        LINK_LIST_ID
    }

    fn create(&self, base_url: &str, transport: Transport) -> Box<dyn Scraper> {
        Box::new(LinkListScraper::new(base_url, transport))
    }
}

/// Scraper for sites that are a flat page of file links.
pub struct LinkListScraper {
    base_url: String,
    transport: Transport,
}

impl LinkListScraper {
    /// Creates an adapter bound to one site's base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>, transport: Transport) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
        }
    }

    fn page_url(&self, category_ref: &str) -> String {
        if category_ref == DEFAULT_CATEGORY_REF {
            self.base_url.clone()
        } else {
            category_ref.to_string()
        }
    }
}

#[async_trait]
impl Scraper for LinkListScraper {
    fn id(&self) -> &str {
        LINK_LIST_ID
    }

    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn discover_categories(&self) -> Result<Vec<CategoryDescriptor>, ScrapeError> {
        if Url::parse(&self.base_url).is_err() {
            return Err(ScrapeError::parse(
                &self.base_url,
                "site base URL is not a valid absolute URL",
            ));
        }

        Ok(vec![CategoryDescriptor {
            ref_id: DEFAULT_CATEGORY_REF.to_string(),
            name: "All files".to_string(),
            url: self.base_url.clone(),
            parent_ref: None,
        }])
    }

    #[instrument(skip(self))]
    async fn list_files(&self, category_ref: &str) -> Result<Vec<FileDescriptor>, ScrapeError> {
        let page_url = self.page_url(category_ref);
        let page = Url::parse(&page_url)
            .map_err(|_| ScrapeError::not_found(category_ref))?;

        let body = self.transport.fetch_text(page.as_str()).await?;

        let mut files = Vec::new();
        let mut seen = HashSet::new();

        for capture in href_regex().captures_iter(&body) {
            let href = &capture[1];
            // Relative links resolve against the listing page itself.
            let Ok(resolved) = page.join(href) else {
                continue;
            };
            let Some(file_type) = file_type_for_path(resolved.path()) else {
                continue;
            };
            if !seen.insert(resolved.to_string()) {
                continue;
            }

            let name = resolved
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|segment| !segment.is_empty())
                .unwrap_or("download")
                .to_string();

            files.push(FileDescriptor {
                ref_id: resolved.to_string(),
                name,
                url: resolved.to_string(),
                size: None,
                file_type: file_type.to_string(),
                category_ref: category_ref.to_string(),
            });
        }

        debug!(url = %page, count = files.len(), "link scan finished");
        Ok(files)
    }

    #[instrument(skip(self))]
    async fn resolve_download_url(&self, file_ref: &str) -> Result<String, ScrapeError> {
        // File references are the download URLs themselves.
        if Url::parse(file_ref).is_err() {
            return Err(ScrapeError::not_found(file_ref));
        }
        Ok(file_ref.to_string())
    }
}
