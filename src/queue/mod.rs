//! Durable download queue operations over the catalog store.
//!
//! Enqueuing is the only way to create a task. Duplicate tasks for a
//! remote file with an active (pending or in-progress) task are rejected
//! to avoid redundant transfers; pending tasks can be reprioritized or
//! removed, anything further along cannot.

use thiserror::Error;
use tracing::instrument;

use crate::store::{DownloadTask, Store, StoreError, TaskStatus};

/// Errors from queue mutations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An active task already exists for the remote file.
    #[error("a pending or in-progress task already exists for remote file {remote_file_id}")]
    DuplicateTask {
        /// The remote file that already has an active task.
        remote_file_id: i64,
    },

    /// The mutation only applies to pending tasks.
    #[error("task {task_id} is {status}; only pending tasks can be modified")]
    InvalidState {
        /// The task that was targeted.
        task_id: i64,
        /// Its actual status.
        status: TaskStatus,
    },
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, TaskError>;

/// Queue interface over the store's download-task records.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    store: Store,
}

impl TaskQueue {
    /// Creates a queue over the given store.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Enqueues a pending task for a remote file.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::DuplicateTask`] when a pending or in-progress
    /// task already exists for the file, and
    /// [`StoreError::RemoteFileNotFound`] (wrapped) when the file does not
    /// exist.
    #[instrument(skip(self))]
    pub async fn enqueue(&self, remote_file_id: i64, priority: i64) -> Result<i64> {
        // Existence check up front so a missing file is a clear error
        // rather than a foreign-key violation.
        self.store.require_remote_file(remote_file_id).await?;

        match self
            .store
            .insert_task_if_absent(remote_file_id, priority)
            .await?
        {
            Some(id) => Ok(id),
            None => Err(TaskError::DuplicateTask { remote_file_id }),
        }
    }

    /// Enqueues a batch of remote files, skipping ones that already have
    /// an active task. Returns the ids of the tasks actually created.
    ///
    /// # Errors
    ///
    /// Returns the first non-duplicate failure; earlier inserts stay.
    #[instrument(skip(self, remote_file_ids), fields(count = remote_file_ids.len()))]
    pub async fn enqueue_batch(
        &self,
        remote_file_ids: &[i64],
        priority: i64,
    ) -> Result<Vec<i64>> {
        let mut created = Vec::new();
        for &remote_file_id in remote_file_ids {
            match self.enqueue(remote_file_id, priority).await {
                Ok(id) => created.push(id),
                Err(TaskError::DuplicateTask { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }

    /// Changes the priority of a pending task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidState`] for tasks already claimed or
    /// terminal, [`StoreError::TaskNotFound`] (wrapped) for missing tasks.
    #[instrument(skip(self))]
    pub async fn reorder(&self, task_id: i64, priority: i64) -> Result<()> {
        let changed = self
            .store
            .update_pending_task_priority(task_id, priority)
            .await?;
        if changed > 0 {
            return Ok(());
        }
        Err(self.pending_only_failure(task_id).await?)
    }

    /// Removes a pending task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidState`] for tasks already claimed or
    /// terminal, [`StoreError::TaskNotFound`] (wrapped) for missing tasks.
    #[instrument(skip(self))]
    pub async fn remove(&self, task_id: i64) -> Result<()> {
        let removed = self.store.delete_pending_task(task_id).await?;
        if removed > 0 {
            return Ok(());
        }
        Err(self.pending_only_failure(task_id).await?)
    }

    /// Distinguishes "not pending" from "not there" after a zero-row
    /// pending-only mutation.
    async fn pending_only_failure(&self, task_id: i64) -> std::result::Result<TaskError, StoreError> {
        match self.store.get_task(task_id).await? {
            Some(task) => Ok(TaskError::InvalidState {
                task_id,
                status: task.status(),
            }),
            None => Ok(TaskError::Store(StoreError::TaskNotFound(task_id))),
        }
    }

    /// Gets a task by ID.
    ///
    /// # Errors
    ///
    /// Returns a wrapped [`StoreError`] if the query fails.
    pub async fn get(&self, task_id: i64) -> Result<Option<DownloadTask>> {
        Ok(self.store.get_task(task_id).await?)
    }

    /// Lists tasks, optionally filtered by status, in claim order.
    ///
    /// # Errors
    ///
    /// Returns a wrapped [`StoreError`] if the query fails.
    pub async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<DownloadTask>> {
        Ok(self.store.list_tasks(status).await?)
    }

    /// Counts tasks in a given status.
    ///
    /// # Errors
    ///
    /// Returns a wrapped [`StoreError`] if the query fails.
    pub async fn count(&self, status: TaskStatus) -> Result<i64> {
        Ok(self.store.count_tasks(status).await?)
    }

    /// Returns crash-recovery state: any `in_progress` leftovers from a
    /// previous session back to pending.
    ///
    /// # Errors
    ///
    /// Returns a wrapped [`StoreError`] if the update fails.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        Ok(self.store.reset_in_progress_tasks().await?)
    }
}
