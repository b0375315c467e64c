//! Download engine: drains the task queue with bounded concurrency,
//! per-site request spacing, retry on transient failures, and a
//! temp-file-then-rename commit protocol.
//!
//! # Concurrency model
//!
//! - Each claimed task runs in its own Tokio task
//! - A semaphore permit is held from claim until the task's terminal state
//!   is persisted, so a slot never takes new work before the previous
//!   task's outcome is durable
//! - The claim itself is an atomic UPDATE..RETURNING in the store
//!
//! # Commit protocol
//!
//! Bytes stream into `<dest>.part`; only a complete body (verified against
//! Content-Length) is renamed into place. The file validator then runs.
//! A validation failure is recorded on the LocalFile record, not on the
//! task: download success and content validity are orthogonal facts, and
//! the next comparison reports the file as corrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::events::{EngineEvent, EventSink, Stage};
use crate::scraper::{Scraper, ScraperRegistry};
use crate::store::{DownloadTask, LocalFileRecord, RemoteFile, Store, StoreError, TaskStatus};
use crate::transport::{FetchError, FetchedBody, Transport};
use crate::validate::ValidatorRegistry;

use super::control::QueueControl;
use super::dest::{dest_path, partial_path};
use super::rate_limiter::{RateLimiter, parse_retry_after};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_fetch_error};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 16;

/// Default concurrency if not specified. Small on purpose: remote
/// catalogs are other people's servers.
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Reason recorded on tasks aborted by operator cancellation.
const CANCELLED_REASON: &str = "cancelled by operator";

/// Error type for engine-level failures.
///
/// Individual task failures are not engine errors; they are persisted on
/// the task and counted in [`RunStats`]. Only conditions that prevent the
/// run itself (store unavailable, bad configuration) surface here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Store operation failed; no progress can be durably recorded.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Everything a queue run needs from the outside world.
#[derive(Clone)]
pub struct RunEnv {
    /// Catalog store handle.
    pub store: Store,
    /// Adapter registry for resolving download URLs per site.
    pub scrapers: Arc<ScraperRegistry>,
    /// Validator registry run against committed files.
    pub validators: Arc<ValidatorRegistry>,
    /// Shared HTTP transport.
    pub transport: Transport,
    /// Local download root; category chains are mirrored beneath it.
    pub root: PathBuf,
    /// Event emitter for progress and task state changes.
    pub events: EventSink,
}

/// Statistics from one queue run.
#[derive(Debug, Default)]
pub struct RunStats {
    completed: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
}

impl RunStats {
    /// Number of tasks that completed.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Number of tasks that ended failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Number of retry attempts made across all tasks.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Total terminal tasks (completed + failed).
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.failed()
    }

    fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }
}

/// Concurrency-bounded, rate-limited queue drainer.
#[derive(Debug)]
pub struct DownloadEngine {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    retry_policy: RetryPolicy,
    rate_limiter: Arc<RateLimiter>,
    control: Arc<QueueControl>,
}

impl DownloadEngine {
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] when `concurrency` is
    /// outside 1..=16.
    #[instrument(level = "debug", skip(retry_policy, rate_limiter, control))]
    pub fn new(
        concurrency: usize,
        retry_policy: RetryPolicy,
        rate_limiter: Arc<RateLimiter>,
        control: Arc<QueueControl>,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            max_attempts = retry_policy.max_attempts(),
            rate_limit_ms = rate_limiter.min_delay().as_millis(),
            "creating download engine"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            retry_policy,
            rate_limiter,
            control,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Returns the control handle governing this engine.
    #[must_use]
    pub fn control(&self) -> Arc<QueueControl> {
        Arc::clone(&self.control)
    }

    /// Drains pending tasks until the queue is empty or a stop is
    /// requested. Pause blocks claiming between tasks; in-flight transfers
    /// always run to their own terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] when the store becomes unavailable
    /// (the only fatal condition); individual task failures are recorded
    /// per task and counted in the returned stats.
    #[instrument(skip(self, env), fields(root = %env.root.display()))]
    pub async fn run(&self, env: &RunEnv) -> Result<RunStats, EngineError> {
        let stats = Arc::new(RunStats::default());
        let total = env.store.count_tasks(TaskStatus::Pending).await? as u64;
        let done = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::new();

        info!(pending = total, concurrency = self.concurrency, "starting queue run");

        loop {
            if self.control.is_stopped() {
                debug!("stop requested; no further tasks will be claimed");
                break;
            }
            self.control.wait_while_paused().await;
            if self.control.is_stopped() {
                break;
            }

            let Some(task) = env.store.claim_next_pending_task().await? else {
                break;
            };
            env.events.send(EngineEvent::TaskStateChanged {
                task_id: task.id,
                status: TaskStatus::InProgress,
            });

            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| EngineError::SemaphoreClosed)?;

            let env = env.clone();
            let policy = self.retry_policy.clone();
            let rate_limiter = Arc::clone(&self.rate_limiter);
            let control = Arc::clone(&self.control);
            let stats = Arc::clone(&stats);
            let done = Arc::clone(&done);

            handles.push(tokio::spawn(async move {
                // Permit held until the terminal state is persisted (RAII).
                let _permit = permit;

                process_task(&env, &task, &policy, &rate_limiter, &control, &stats).await;

                let done_now = done.fetch_add(1, Ordering::SeqCst) + 1;
                env.events.send(EngineEvent::Progress {
                    stage: Stage::Download,
                    done: done_now,
                    total,
                });
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "download task panicked");
            }
        }

        info!(
            completed = stats.completed(),
            failed = stats.failed(),
            retried = stats.retried(),
            "queue run finished"
        );

        match Arc::try_unwrap(stats) {
            Ok(stats) => Ok(stats),
            Err(arc_stats) => {
                // All tasks are joined; sole ownership is expected. Fall back
                // to copying the counters if something still holds the Arc.
                let stats = RunStats::default();
                stats.completed.store(arc_stats.completed(), Ordering::SeqCst);
                stats.failed.store(arc_stats.failed(), Ordering::SeqCst);
                stats.retried.store(arc_stats.retried(), Ordering::SeqCst);
                Ok(stats)
            }
        }
    }
}

/// Runs one claimed task to its terminal state.
#[instrument(skip_all, fields(task_id = task.id, remote_file_id = task.remote_file_id))]
async fn process_task(
    env: &RunEnv,
    task: &DownloadTask,
    policy: &RetryPolicy,
    rate_limiter: &RateLimiter,
    control: &QueueControl,
    stats: &RunStats,
) {
    let remote = match env.store.get_remote_file(task.remote_file_id).await {
        Ok(Some(remote)) => remote,
        Ok(None) => {
            mark_failed(env, task.id, "remote file record no longer exists", 0, stats).await;
            return;
        }
        Err(e) => {
            mark_failed(env, task.id, &format!("store read failed: {e}"), 0, stats).await;
            return;
        }
    };

    let site = match env.store.get_site(remote.site_id).await {
        Ok(Some(site)) => site,
        Ok(None) => {
            mark_failed(env, task.id, "owning site record no longer exists", 0, stats).await;
            return;
        }
        Err(e) => {
            mark_failed(env, task.id, &format!("store read failed: {e}"), 0, stats).await;
            return;
        }
    };

    let scraper = match env
        .scrapers
        .create(&site.scraper, &site.url, env.transport.clone())
    {
        Ok(scraper) => scraper,
        Err(e) => {
            mark_failed(env, task.id, &e.to_string(), 0, stats).await;
            return;
        }
    };

    let chain = match remote.category_id {
        Some(category_id) => env
            .store
            .category_chain(category_id)
            .await
            .unwrap_or_default(),
        None => Vec::new(),
    };
    let dest = dest_path(&env.root, &chain, &remote.name);
    let temp = partial_path(&dest);

    if let Some(parent) = dest.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            mark_failed(
                env,
                task.id,
                &format!("cannot create directory {}: {e}", parent.display()),
                0,
                stats,
            )
            .await;
            return;
        }
    }

    let mut cancel = control.register_inflight(task.id);
    let outcome = transfer_with_retry(
        env,
        scraper.as_ref(),
        &remote,
        &temp,
        policy,
        rate_limiter,
        stats,
        &mut cancel,
    )
    .await;
    control.clear_inflight(task.id);

    match outcome {
        Ok((body, attempts)) => {
            commit_transfer(env, task, &remote, &temp, &dest, &body, attempts, stats).await;
        }
        Err((reason, attempts)) => {
            // Partial bytes are never committed.
            let _ = tokio::fs::remove_file(&temp).await;
            mark_failed(env, task.id, &reason, attempts.saturating_sub(1), stats).await;
        }
    }
}

/// Attempts the transfer, retrying transport-class failures with backoff.
///
/// The task stays `in_progress` across retries from the caller's
/// perspective; only the final outcome flips its status.
#[allow(clippy::too_many_arguments)]
async fn transfer_with_retry(
    env: &RunEnv,
    scraper: &dyn Scraper,
    remote: &RemoteFile,
    temp: &std::path::Path,
    policy: &RetryPolicy,
    rate_limiter: &RateLimiter,
    stats: &RunStats,
    cancel: &mut tokio::sync::watch::Receiver<bool>,
) -> Result<(FetchedBody, u32), (String, u32)> {
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        debug!(attempt, url = %remote.url, "attempting transfer");

        // The download URL may be stale between attempts; resolve each time.
        let download_url = match scraper.resolve_download_url(&remote.url).await {
            Ok(url) => url,
            Err(e) if e.is_retryable() => {
                match policy.should_retry(FailureType::Transient, attempt) {
                    RetryDecision::Retry { delay, .. } => {
                        stats.increment_retried();
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    RetryDecision::DoNotRetry { .. } => return Err((e.to_string(), attempt)),
                }
            }
            Err(e) => return Err((e.to_string(), attempt)),
        };

        rate_limiter.acquire(&download_url).await;

        match env.transport.download_to_path(&download_url, temp, cancel).await {
            Ok(body) => return Ok((body, attempt)),
            Err(FetchError::Cancelled { .. }) => {
                return Err((CANCELLED_REASON.to_string(), attempt));
            }
            Err(e) => {
                let failure_type = classify_fetch_error(&e);

                if failure_type == FailureType::RateLimited {
                    if let FetchError::HttpStatus {
                        retry_after: Some(header),
                        ..
                    } = &e
                    {
                        if let Some(delay) = parse_retry_after(header) {
                            rate_limiter.record_server_delay(&download_url, delay).await;
                        }
                    }
                }

                match policy.should_retry(failure_type, attempt) {
                    RetryDecision::Retry { delay, attempt: next } => {
                        info!(
                            url = %download_url,
                            attempt = next,
                            max_attempts = policy.max_attempts(),
                            delay_ms = delay.as_millis(),
                            error = %e,
                            "retrying transfer"
                        );
                        stats.increment_retried();
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(url = %download_url, %reason, "not retrying transfer");
                        // Recorded verbatim on the task.
                        return Err((e.to_string(), attempt));
                    }
                }
            }
        }
    }
}

/// Renames the complete body into place, validates it, and persists the
/// LocalFile + task completion.
#[allow(clippy::too_many_arguments)]
async fn commit_transfer(
    env: &RunEnv,
    task: &DownloadTask,
    remote: &RemoteFile,
    temp: &std::path::Path,
    dest: &std::path::Path,
    body: &FetchedBody,
    attempts: u32,
    stats: &RunStats,
) {
    if let Err(e) = tokio::fs::rename(temp, dest).await {
        let _ = tokio::fs::remove_file(temp).await;
        mark_failed(
            env,
            task.id,
            &format!("cannot move download into place: {e}"),
            attempts.saturating_sub(1),
            stats,
        )
        .await;
        return;
    }

    let validation = env.validators.validate(dest, Some(&remote.file_type));
    if !validation.valid {
        warn!(
            path = %dest.display(),
            error = validation.error.as_deref().unwrap_or("unknown"),
            "downloaded file failed validation"
        );
    }

    let path = dest.to_string_lossy();
    let record = LocalFileRecord {
        remote_file_id: Some(remote.id),
        path: path.as_ref(),
        size: body.bytes_written as i64,
        file_type: &remote.file_type,
        validation_error: validation.error.as_deref(),
    };

    let local_file_id = match env.store.record_local_file(&record).await {
        Ok(id) => id,
        Err(e) => {
            mark_failed(
                env,
                task.id,
                &format!("cannot persist local file record: {e}"),
                attempts.saturating_sub(1),
                stats,
            )
            .await;
            return;
        }
    };

    if let Err(e) = env
        .store
        .mark_task_completed(task.id, local_file_id, i64::from(attempts.saturating_sub(1)))
        .await
    {
        warn!(task_id = task.id, error = %e, "failed to mark task completed");
    }
    env.events.send(EngineEvent::TaskStateChanged {
        task_id: task.id,
        status: TaskStatus::Completed,
    });
    stats.increment_completed();
    info!(task_id = task.id, path = %dest.display(), "download completed");
}

/// Persists a failed terminal state. Best-effort: a failed status write
/// is logged, never panics the worker.
async fn mark_failed(env: &RunEnv, task_id: i64, reason: &str, retries: u32, stats: &RunStats) {
    if let Err(e) = env
        .store
        .mark_task_failed(task_id, reason, i64::from(retries))
        .await
    {
        warn!(task_id, error = %e, "failed to mark task failed");
    }
    env.events.send(EngineEvent::TaskStateChanged {
        task_id,
        status: TaskStatus::Failed,
    });
    stats.increment_failed();
}
