//! Record types for the catalog store.
//!
//! All identity and lifetime is owned by the store; these are plain data
//! rows hydrated with `sqlx::FromRow`. Timestamps are TEXT in SQLite's
//! `datetime('now')` format (UTC).

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A remote catalog registered by the operator.
#[derive(Debug, Clone, FromRow)]
pub struct Site {
    /// Unique identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Base URL, unique per site.
    pub url: String,
    /// Scraper adapter identifier (registry key).
    pub scraper: String,
    /// When the last remote scan finished, if any.
    pub last_scan_at: Option<String>,
    /// When the row was created.
    pub created_at: String,
    /// When the row was last updated.
    pub updated_at: String,
}

/// A category discovered on a remote site. Categories form a tree via
/// `parent_id`; the tree is guarded against cycles at insertion time.
#[derive(Debug, Clone, FromRow)]
pub struct Category {
    /// Unique identifier.
    pub id: i64,
    /// Owning site.
    pub site_id: i64,
    /// Display name.
    pub name: String,
    /// Remote URL, unique within a site.
    pub url: String,
    /// Optional parent category.
    pub parent_id: Option<i64>,
    /// When the row was created.
    pub created_at: String,
    /// When the row was last updated.
    pub updated_at: String,
}

/// A file advertised by a remote catalog, keyed by (site, url).
#[derive(Debug, Clone, FromRow)]
pub struct RemoteFile {
    /// Unique identifier.
    pub id: i64,
    /// Owning site.
    pub site_id: i64,
    /// Category the file was listed under, if any.
    pub category_id: Option<i64>,
    /// Display name (usually the remote filename).
    pub name: String,
    /// Source URL.
    pub url: String,
    /// Remote byte size; the remote may not report one.
    pub size: Option<i64>,
    /// File-type tag (pdf, epub, txt, ...).
    pub file_type: String,
    /// When the file was last seen by a scan.
    pub last_checked_at: String,
    /// When the row was created.
    pub created_at: String,
    /// When the row was last updated.
    pub updated_at: String,
}

/// A file on local disk, optionally back-referencing the remote record it
/// mirrors. The reference is weak: deleting the remote record nulls it.
#[derive(Debug, Clone, FromRow)]
pub struct LocalFile {
    /// Unique identifier.
    pub id: i64,
    /// Back-reference to the mirrored remote file, if linked.
    pub remote_file_id: Option<i64>,
    /// Filesystem path, unique.
    pub path: String,
    /// Byte size at last check.
    pub size: i64,
    /// File-type tag.
    pub file_type: String,
    /// Validator reason recorded when a completed download failed
    /// structural validation; cleared on a valid re-check.
    pub validation_error: Option<String>,
    /// When the file was last checked on disk.
    pub last_checked_at: String,
    /// When the row was created.
    pub created_at: String,
    /// When the row was last updated.
    pub updated_at: String,
}

/// Status of a download task.
///
/// Transitions are monotonic: pending → `in_progress` → completed/failed.
/// Failed tasks are re-enqueued as new pending rows, never rewound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed by the download engine.
    Pending,
    /// Claimed; a transfer (possibly retrying) is underway.
    InProgress,
    /// Transfer finished and the result was committed.
    Completed,
    /// Transfer gave up; `last_error` holds the reason.
    Failed,
}

impl TaskStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid task status: {s}")),
        }
    }
}

/// The durable record of one file-transfer attempt through its lifecycle.
#[derive(Debug, Clone, FromRow)]
pub struct DownloadTask {
    /// Unique identifier.
    pub id: i64,
    /// The remote file being transferred (required).
    pub remote_file_id: i64,
    /// The local file the transfer materialized, once it exists.
    pub local_file_id: Option<i64>,
    /// Current lifecycle status (stored as text, parsed via `status()`).
    #[sqlx(rename = "status")]
    pub status_str: String,
    /// Higher priority tasks are claimed first (default 0).
    pub priority: i64,
    /// Transport retries consumed before the terminal state.
    pub retry_count: i64,
    /// Last error message when failed.
    pub last_error: Option<String>,
    /// When the task was claimed.
    pub started_at: Option<String>,
    /// When the task reached a terminal state.
    pub completed_at: Option<String>,
    /// When the row was created.
    pub created_at: String,
    /// When the row was last updated.
    pub updated_at: String,
}

impl DownloadTask {
    /// Returns the parsed status enum.
    ///
    /// Falls back to `Pending` if the status string is invalid.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.status_str.parse().unwrap_or(TaskStatus::Pending)
    }
}

impl fmt::Display for DownloadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DownloadTask {{ id: {}, remote_file: {}, status: {} }}",
            self.id,
            self.remote_file_id,
            self.status()
        )
    }
}

/// A configuration setting row. Consumed only by CLI/config plumbing.
#[derive(Debug, Clone, FromRow)]
pub struct Setting {
    /// Unique identifier.
    pub id: i64,
    /// Setting namespace (e.g. "download", "network").
    pub category: String,
    /// Setting key, unique within its category.
    pub key: String,
    /// Setting value, if set.
    pub value: Option<String>,
    /// When the row was created.
    pub created_at: String,
    /// When the row was last updated.
    pub updated_at: String,
}
