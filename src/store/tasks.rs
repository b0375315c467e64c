//! Download task records: the durable work-item state of the download
//! queue plus its append-mostly audit history.
//!
//! Status transitions are monotonic (pending → `in_progress` →
//! completed/failed). A failed transfer is retried by enqueuing a *new*
//! pending task; terminal rows are never rewound.

use sqlx::Row;
use tracing::instrument;

use super::models::{DownloadTask, TaskStatus};
use super::{Result, Store};

impl Store {
    /// Inserts a pending task for a remote file unless one is already
    /// active (pending or in-progress) for it.
    ///
    /// Returns `None` when an active task exists; the conditional insert
    /// makes the duplicate check atomic with the write.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the insert fails (a
    /// missing remote file surfaces as a foreign-key constraint violation).
    #[instrument(skip(self))]
    pub async fn insert_task_if_absent(
        &self,
        remote_file_id: i64,
        priority: i64,
    ) -> Result<Option<i64>> {
        let row = sqlx::query(
            r"INSERT INTO downloads (remote_file_id, status, priority)
              SELECT ?, ?, ?
              WHERE NOT EXISTS (
                  SELECT 1 FROM downloads
                  WHERE remote_file_id = ? AND status IN (?, ?)
              )
              RETURNING id",
        )
        .bind(remote_file_id)
        .bind(TaskStatus::Pending.as_str())
        .bind(priority)
        .bind(remote_file_id)
        .bind(TaskStatus::Pending.as_str())
        .bind(TaskStatus::InProgress.as_str())
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| r.get("id")))
    }

    /// Atomically claims the highest-priority pending task, transitioning
    /// it to `in_progress` and stamping `started_at`.
    ///
    /// Returns `None` when no pending task exists.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn claim_next_pending_task(&self) -> Result<Option<DownloadTask>> {
        // UPDATE..RETURNING keeps select-and-claim race-free across workers.
        let task = sqlx::query_as::<_, DownloadTask>(
            r"UPDATE downloads
              SET status = ?, started_at = datetime('now'), updated_at = datetime('now')
              WHERE id = (
                  SELECT id FROM downloads
                  WHERE status = ?
                  ORDER BY priority DESC, created_at ASC, id ASC
                  LIMIT 1
              )
              RETURNING *",
        )
        .bind(TaskStatus::InProgress.as_str())
        .bind(TaskStatus::Pending.as_str())
        .fetch_optional(self.pool())
        .await?;

        Ok(task)
    }

    /// Marks a task completed, recording the materialized local file and
    /// the transport retries it took.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::TaskNotFound`] for a missing row,
    /// [`super::StoreError::InvalidTransition`] for a task that was never
    /// claimed or is already terminal.
    #[instrument(skip(self))]
    pub async fn mark_task_completed(
        &self,
        id: i64,
        local_file_id: i64,
        retry_count: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE downloads
              SET status = ?,
                  local_file_id = ?,
                  retry_count = ?,
                  completed_at = datetime('now'),
                  updated_at = datetime('now')
              WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Completed.as_str())
        .bind(local_file_id)
        .bind(retry_count)
        .bind(id)
        .bind(TaskStatus::InProgress.as_str())
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_failure(id, TaskStatus::Completed).await?);
        }
        Ok(())
    }

    /// Marks a task failed with the final error message, recorded verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::TaskNotFound`] for a missing row,
    /// [`super::StoreError::InvalidTransition`] for a task that was never
    /// claimed or is already terminal.
    #[instrument(skip(self), fields(error = %error))]
    pub async fn mark_task_failed(&self, id: i64, error: &str, retry_count: i64) -> Result<()> {
        let result = sqlx::query(
            r"UPDATE downloads
              SET status = ?,
                  last_error = ?,
                  retry_count = ?,
                  completed_at = datetime('now'),
                  updated_at = datetime('now')
              WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Failed.as_str())
        .bind(error)
        .bind(retry_count)
        .bind(id)
        .bind(TaskStatus::InProgress.as_str())
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transition_failure(id, TaskStatus::Failed).await?);
        }
        Ok(())
    }

    /// Distinguishes "missing" from "wrong state" after a guarded status
    /// write changed no rows.
    async fn transition_failure(
        &self,
        id: i64,
        target: TaskStatus,
    ) -> Result<super::StoreError> {
        match self.get_task(id).await? {
            Some(task) => Ok(super::StoreError::InvalidTransition {
                task_id: id,
                status: task.status_str,
                target: target.as_str().to_string(),
            }),
            None => Ok(super::StoreError::TaskNotFound(id)),
        }
    }

    /// Updates the priority of a task, only while it is still pending.
    ///
    /// Returns the number of rows changed (0 when the task is missing or no
    /// longer pending; the queue layer turns that into a typed error).
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn update_pending_task_priority(&self, id: i64, priority: i64) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE downloads
              SET priority = ?, updated_at = datetime('now')
              WHERE id = ? AND status = ?",
        )
        .bind(priority)
        .bind(id)
        .bind(TaskStatus::Pending.as_str())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes a task, only while it is still pending.
    ///
    /// Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete_pending_task(&self, id: i64) -> Result<u64> {
        let result = sqlx::query(r"DELETE FROM downloads WHERE id = ? AND status = ?")
            .bind(id)
            .bind(TaskStatus::Pending.as_str())
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Gets a task by ID.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_task(&self, id: i64) -> Result<Option<DownloadTask>> {
        let task = sqlx::query_as::<_, DownloadTask>(r"SELECT * FROM downloads WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        Ok(task)
    }

    /// Counts tasks by status.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_tasks(&self, status: TaskStatus) -> Result<i64> {
        let row = sqlx::query(r"SELECT COUNT(*) AS count FROM downloads WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(self.pool())
            .await?;

        Ok(row.get("count"))
    }

    /// Lists tasks, optionally filtered by status, in claim order.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<DownloadTask>> {
        let tasks = match status {
            Some(status) => {
                sqlx::query_as::<_, DownloadTask>(
                    r"SELECT * FROM downloads
                      WHERE status = ?
                      ORDER BY priority DESC, created_at ASC, id ASC",
                )
                .bind(status.as_str())
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query_as::<_, DownloadTask>(
                    r"SELECT * FROM downloads ORDER BY priority DESC, created_at ASC, id ASC",
                )
                .fetch_all(self.pool())
                .await?
            }
        };

        Ok(tasks)
    }

    /// Returns any tasks left `in_progress` by a previous session back to
    /// pending. Called at startup for crash recovery.
    ///
    /// # Errors
    ///
    /// Returns [`super::StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn reset_in_progress_tasks(&self) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE downloads
              SET status = ?, updated_at = datetime('now')
              WHERE status = ?",
        )
        .bind(TaskStatus::Pending.as_str())
        .bind(TaskStatus::InProgress.as_str())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }
}
