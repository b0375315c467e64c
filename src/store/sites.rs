//! Site records: created by operator action, stamped by remote scans.

use sqlx::Row;
use tracing::instrument;

use super::models::Site;
use super::{Result, Store, StoreError};

impl Store {
    /// Registers a new site.
    ///
    /// # Errors
    ///
    /// Returns a constraint-violation [`StoreError::Database`] when a site
    /// with the same base URL already exists.
    #[instrument(skip(self), fields(url = %url, scraper = %scraper))]
    pub async fn add_site(&self, name: &str, url: &str, scraper: &str) -> Result<i64> {
        let row = sqlx::query(
            r"INSERT INTO sites (name, url, scraper)
              VALUES (?, ?, ?)
              RETURNING id",
        )
        .bind(name)
        .bind(url)
        .bind(scraper)
        .fetch_one(self.pool())
        .await?;

        Ok(row.get("id"))
    }

    /// Gets a site by ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_site(&self, id: i64) -> Result<Option<Site>> {
        let site = sqlx::query_as::<_, Site>(r"SELECT * FROM sites WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(site)
    }

    /// Gets a site by ID, failing when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SiteNotFound`] for a missing row.
    pub async fn require_site(&self, id: i64) -> Result<Site> {
        self.get_site(id).await?.ok_or(StoreError::SiteNotFound(id))
    }

    /// Lists all registered sites ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_sites(&self) -> Result<Vec<Site>> {
        let sites = sqlx::query_as::<_, Site>(r"SELECT * FROM sites ORDER BY name, id")
            .fetch_all(self.pool())
            .await?;

        Ok(sites)
    }

    /// Stamps the site's last successful remote scan time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SiteNotFound`] if no site exists with the ID.
    #[instrument(skip(self))]
    pub async fn touch_site_scan(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE sites
              SET last_scan_at = datetime('now'), updated_at = datetime('now')
              WHERE id = ?",
        )
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SiteNotFound(id));
        }
        Ok(())
    }

    /// Removes a site and, through the schema's cascades, its categories and
    /// remote files. Local files survive with their back-references nulled.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SiteNotFound`] if no site exists with the ID.
    #[instrument(skip(self))]
    pub async fn remove_site(&self, id: i64) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        // Set-null is store behavior, not just a schema annotation: clear the
        // back-references for every remote file owned by this site first.
        sqlx::query(
            r"UPDATE local_files
              SET remote_file_id = NULL, updated_at = datetime('now')
              WHERE remote_file_id IN (SELECT id FROM remote_files WHERE site_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(r"DELETE FROM sites WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SiteNotFound(id));
        }

        tx.commit().await?;
        Ok(())
    }
}
