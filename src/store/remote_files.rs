//! Remote file records, upserted during remote scans keyed by (site, url).

use sqlx::Row;
use tracing::instrument;

use super::models::RemoteFile;
use super::{Result, Store, StoreError};

/// Input for a remote-file upsert.
#[derive(Debug, Clone)]
pub struct RemoteFileUpsert<'a> {
    /// Category the file was listed under, if any.
    pub category_id: Option<i64>,
    /// Display name.
    pub name: &'a str,
    /// Source URL (the conflict key within the site).
    pub url: &'a str,
    /// Remote byte size when the catalog reports one.
    pub size: Option<i64>,
    /// File-type tag inferred by the scraper.
    pub file_type: &'a str,
}

impl Store {
    /// Inserts or updates a remote file, returning its id.
    ///
    /// An existing row (same site and url) has its mutable fields
    /// overwritten and `last_checked_at` stamped; rescans never duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    #[instrument(skip(self, upsert), fields(url = %upsert.url))]
    pub async fn upsert_remote_file(
        &self,
        site_id: i64,
        upsert: &RemoteFileUpsert<'_>,
    ) -> Result<i64> {
        let row = sqlx::query(
            r"INSERT INTO remote_files (site_id, category_id, name, url, size, file_type)
              VALUES (?, ?, ?, ?, ?, ?)
              ON CONFLICT (site_id, url) DO UPDATE SET
                  category_id = excluded.category_id,
                  name = excluded.name,
                  size = excluded.size,
                  file_type = excluded.file_type,
                  last_checked_at = datetime('now'),
                  updated_at = datetime('now')
              RETURNING id",
        )
        .bind(site_id)
        .bind(upsert.category_id)
        .bind(upsert.name)
        .bind(upsert.url)
        .bind(upsert.size)
        .bind(upsert.file_type)
        .fetch_one(self.pool())
        .await?;

        Ok(row.get("id"))
    }

    /// Gets a remote file by ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_remote_file(&self, id: i64) -> Result<Option<RemoteFile>> {
        let file = sqlx::query_as::<_, RemoteFile>(r"SELECT * FROM remote_files WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(file)
    }

    /// Gets a remote file by ID, failing when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RemoteFileNotFound`] for a missing row.
    pub async fn require_remote_file(&self, id: i64) -> Result<RemoteFile> {
        self.get_remote_file(id)
            .await?
            .ok_or(StoreError::RemoteFileNotFound(id))
    }

    /// Lists remote files for one site, or all sites when `site_id` is None.
    ///
    /// This is the comparison engine's scope query.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn remote_files_in_scope(&self, site_id: Option<i64>) -> Result<Vec<RemoteFile>> {
        let files = match site_id {
            Some(site_id) => {
                sqlx::query_as::<_, RemoteFile>(
                    r"SELECT * FROM remote_files WHERE site_id = ? ORDER BY name, id",
                )
                .bind(site_id)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, RemoteFile>(r"SELECT * FROM remote_files ORDER BY name, id")
                    .fetch_all(self.pool())
                    .await?
            }
        };

        Ok(files)
    }

    /// Deletes a remote file, explicitly nulling local back-references in
    /// the same transaction. Local files are never cascaded away.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RemoteFileNotFound`] if no row exists with the
    /// given ID.
    #[instrument(skip(self))]
    pub async fn delete_remote_file(&self, id: i64) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r"UPDATE local_files
              SET remote_file_id = NULL, updated_at = datetime('now')
              WHERE remote_file_id = ?",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(r"DELETE FROM remote_files WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RemoteFileNotFound(id));
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::LocalFileRecord;

    async fn store_with_site() -> (Store, i64) {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let site_id = store
            .add_site("Archive A", "https://a.example", "link-list")
            .await
            .unwrap();
        (store, site_id)
    }

    fn upsert<'a>(name: &'a str, url: &'a str, size: Option<i64>) -> RemoteFileUpsert<'a> {
        RemoteFileUpsert {
            category_id: None,
            name,
            url,
            size,
            file_type: "pdf",
        }
    }

    #[tokio::test]
    async fn test_upsert_remote_file_idempotent() {
        let (store, site_id) = store_with_site().await;

        let first = store
            .upsert_remote_file(site_id, &upsert("a.pdf", "https://a.example/a.pdf", Some(1000)))
            .await
            .unwrap();
        let second = store
            .upsert_remote_file(site_id, &upsert("a.pdf", "https://a.example/a.pdf", Some(1000)))
            .await
            .unwrap();

        assert_eq!(first, second);
        let files = store.remote_files_in_scope(Some(site_id)).await.unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_remote_file_overwrites_mutable_fields() {
        let (store, site_id) = store_with_site().await;

        let id = store
            .upsert_remote_file(site_id, &upsert("a.pdf", "https://a.example/a.pdf", Some(1000)))
            .await
            .unwrap();
        store
            .upsert_remote_file(site_id, &upsert("a-v2.pdf", "https://a.example/a.pdf", Some(2000)))
            .await
            .unwrap();

        let file = store.get_remote_file(id).await.unwrap().unwrap();
        assert_eq!(file.name, "a-v2.pdf");
        assert_eq!(file.size, Some(2000));
    }

    #[tokio::test]
    async fn test_scope_query_filters_by_site() {
        let (store, site_a) = store_with_site().await;
        let site_b = store
            .add_site("Archive B", "https://b.example", "link-list")
            .await
            .unwrap();

        store
            .upsert_remote_file(site_a, &upsert("a.pdf", "https://a.example/a.pdf", None))
            .await
            .unwrap();
        store
            .upsert_remote_file(site_b, &upsert("b.pdf", "https://b.example/b.pdf", None))
            .await
            .unwrap();

        assert_eq!(store.remote_files_in_scope(Some(site_a)).await.unwrap().len(), 1);
        assert_eq!(store.remote_files_in_scope(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_remote_file_nulls_local_reference() {
        let (store, site_id) = store_with_site().await;

        let remote_id = store
            .upsert_remote_file(site_id, &upsert("a.pdf", "https://a.example/a.pdf", Some(1000)))
            .await
            .unwrap();
        let local_id = store
            .record_local_file(&LocalFileRecord {
                remote_file_id: Some(remote_id),
                path: "/library/a.pdf",
                size: 1000,
                file_type: "pdf",
                validation_error: None,
            })
            .await
            .unwrap();

        store.delete_remote_file(remote_id).await.unwrap();

        let local = store.get_local_file(local_id).await.unwrap().unwrap();
        assert!(local.remote_file_id.is_none(), "back-reference must be nulled");
    }

    #[tokio::test]
    async fn test_delete_missing_remote_file_fails() {
        let (store, _site_id) = store_with_site().await;
        let result = store.delete_remote_file(404).await;
        assert!(matches!(result, Err(StoreError::RemoteFileNotFound(404))));
    }
}
