//! Local file records, created by the download engine or the local scan.

use sqlx::Row;
use tracing::instrument;

use super::models::LocalFile;
use super::{Result, Store};

/// Input for a full local-file upsert, keyed by filesystem path.
///
/// Used by the download engine, which owns the link and validation outcome.
/// The local scan uses [`Store::upsert_scanned_local_file`] instead, which
/// leaves an existing link untouched.
#[derive(Debug, Clone)]
pub struct LocalFileRecord<'a> {
    /// Back-reference to the mirrored remote file.
    pub remote_file_id: Option<i64>,
    /// Filesystem path (the conflict key).
    pub path: &'a str,
    /// Byte size on disk.
    pub size: i64,
    /// File-type tag.
    pub file_type: &'a str,
    /// Validator reason when the downloaded content failed validation.
    pub validation_error: Option<&'a str>,
}

impl Store {
    /// Inserts or updates a local file record, overwriting the link and
    /// validation outcome. Returns the row id.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the upsert fails.
    #[instrument(skip(self, record), fields(path = %record.path))]
    pub async fn record_local_file(&self, record: &LocalFileRecord<'_>) -> Result<i64> {
        let row = sqlx::query(
            r"INSERT INTO local_files (remote_file_id, path, size, file_type, validation_error)
              VALUES (?, ?, ?, ?, ?)
              ON CONFLICT (path) DO UPDATE SET
                  remote_file_id = excluded.remote_file_id,
                  size = excluded.size,
                  file_type = excluded.file_type,
                  validation_error = excluded.validation_error,
                  last_checked_at = datetime('now'),
                  updated_at = datetime('now')
              RETURNING id",
        )
        .bind(record.remote_file_id)
        .bind(record.path)
        .bind(record.size)
        .bind(record.file_type)
        .bind(record.validation_error)
        .fetch_one(self.pool())
        .await?;

        Ok(row.get("id"))
    }

    /// Upserts a local file found by the directory scan. An existing row
    /// keeps its remote link and validation state; only the observed size,
    /// type, and check time are refreshed.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the upsert fails.
    #[instrument(skip(self), fields(path = %path))]
    pub async fn upsert_scanned_local_file(
        &self,
        path: &str,
        size: i64,
        file_type: &str,
    ) -> Result<i64> {
        let row = sqlx::query(
            r"INSERT INTO local_files (path, size, file_type)
              VALUES (?, ?, ?)
              ON CONFLICT (path) DO UPDATE SET
                  size = excluded.size,
                  file_type = excluded.file_type,
                  last_checked_at = datetime('now'),
                  updated_at = datetime('now')
              RETURNING id",
        )
        .bind(path)
        .bind(size)
        .bind(file_type)
        .fetch_one(self.pool())
        .await?;

        Ok(row.get("id"))
    }

    /// Gets a local file by ID.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_local_file(&self, id: i64) -> Result<Option<LocalFile>> {
        let file = sqlx::query_as::<_, LocalFile>(r"SELECT * FROM local_files WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(file)
    }

    /// Finds the local file mirroring a remote record, if one exists.
    ///
    /// This is the comparison engine's match query.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn local_file_by_remote_id(&self, remote_file_id: i64) -> Result<Option<LocalFile>> {
        let file = sqlx::query_as::<_, LocalFile>(
            r"SELECT * FROM local_files WHERE remote_file_id = ? LIMIT 1",
        )
        .bind(remote_file_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(file)
    }

    /// Finds a local file by its filesystem path.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self), fields(path = %path))]
    pub async fn local_file_by_path(&self, path: &str) -> Result<Option<LocalFile>> {
        let file = sqlx::query_as::<_, LocalFile>(r"SELECT * FROM local_files WHERE path = ?")
            .bind(path)
            .fetch_optional(self.pool())
            .await?;

        Ok(file)
    }

    /// Lists all local files ordered by path.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_local_files(&self) -> Result<Vec<LocalFile>> {
        let files = sqlx::query_as::<_, LocalFile>(r"SELECT * FROM local_files ORDER BY path")
            .fetch_all(self.pool())
            .await?;

        Ok(files)
    }
}
