//! Catalog store: durable records for sites, categories, remote files,
//! local files, and download tasks.
//!
//! The store is the sole owner of entity identity and lifetime. It is a
//! thin, explicitly-passed handle over the SQLite pool (no global
//! connection state); every mutation maintains `updated_at` and relies on
//! the database's native conflict resolution for upserts, so concurrent
//! scans cannot race a read-then-write into duplicate rows.
//!
//! # Overview
//!
//! - [`Store`] - handle with per-entity operations (one module each)
//! - [`Site`], [`Category`], [`RemoteFile`], [`LocalFile`], [`DownloadTask`] - row types
//! - [`TaskStatus`] - download task lifecycle states
//! - [`StoreError`] - operation error types

mod categories;
mod error;
mod local_files;
mod models;
mod remote_files;
mod settings;
mod sites;
mod tasks;

pub use categories::CategoryUpsert;
pub use error::{StoreDbErrorKind, StoreError};
pub use local_files::LocalFileRecord;
pub use models::{Category, DownloadTask, LocalFile, RemoteFile, Setting, Site, TaskStatus};
pub use remote_files::RemoteFileUpsert;

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Catalog store handle.
///
/// Cheap to clone; all clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub(crate) fn pool(&self) -> &sqlx::SqlitePool {
        self.db.pool()
    }
}
