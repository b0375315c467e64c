//! Error types for catalog store operations.

use std::fmt;

use thiserror::Error;

/// Structured classification for store/database failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreDbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/foreign-key/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Expected row was not found.
    RowNotFound,
    /// Filesystem or transport IO failure.
    Io,
    /// Unclassified database failure.
    Other,
}

impl StoreDbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for StoreDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::RowNotFound => "row_not_found",
            Self::Io => "io",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> StoreDbErrorKind {
    let code = database_error.code();
    if matches!(code.as_deref(), Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")) {
        return StoreDbErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_foreign_key_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return StoreDbErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked") || message.contains("database is busy") {
        return StoreDbErrorKind::BusyOrLocked;
    }

    StoreDbErrorKind::Other
}

/// Errors that can occur during catalog store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Database operation failed. The store is the only place durable state
    /// lives, so callers treat this as fatal for the surrounding operation.
    #[error("store error ({kind}): {message}")]
    Database {
        /// Typed classification used for failure handling.
        kind: StoreDbErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// A referenced site does not exist.
    #[error("site not found: id {0}")]
    SiteNotFound(i64),

    /// A referenced remote file does not exist.
    #[error("remote file not found: id {0}")]
    RemoteFileNotFound(i64),

    /// A referenced local file does not exist.
    #[error("local file not found: id {0}")]
    LocalFileNotFound(i64),

    /// A referenced download task does not exist.
    #[error("download task not found: id {0}")]
    TaskNotFound(i64),

    /// A category parent assignment would make the category its own
    /// ancestor. Remote trees are untrusted, so this is checked on write.
    #[error("category {category_id} would become its own ancestor")]
    CategoryCycle {
        /// The category whose parent chain would loop.
        category_id: i64,
    },

    /// A task status write that would break the monotonic lifecycle
    /// (pending → `in_progress` → completed/failed).
    #[error("task {task_id} is {status}, cannot transition to {target}")]
    InvalidTransition {
        /// The task that was targeted.
        task_id: i64,
        /// Its current status.
        status: String,
        /// The requested status.
        target: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: StoreDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl StoreError {
    /// Returns the typed database error kind, when this is a database error.
    #[must_use]
    pub fn database_kind(&self) -> Option<StoreDbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true when this error is a uniqueness-constraint violation.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        self.database_kind() == Some(StoreDbErrorKind::ConstraintViolation)
    }
}
