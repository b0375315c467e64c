//! Sync orchestrator: ties scrapers, the comparison engine, and the
//! download queue together over the catalog store.
//!
//! Each step (remote scan, local scan, compare, enqueue) is
//! independently invocable; the only ordering is the natural data
//! dependency (comparison is over whatever remote records exist). Per-item
//! failures (one category, one file) are collected into the report and
//! never abort the whole operation; only store unavailability is fatal.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::compare::{Classification, ComparisonEngine};
use crate::events::{EngineEvent, EventSink, Stage};
use crate::queue::{TaskError, TaskQueue};
use crate::scraper::{ScrapeError, ScraperRegistry};
use crate::store::{CategoryUpsert, RemoteFileUpsert, Store, StoreError};
use crate::transport::Transport;
use crate::validate::{ValidatorRegistry, file_type_for_path};

/// Errors from orchestrated operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Store failure; no progress can be durably recorded.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Site-level scrape failure (unknown adapter, category discovery).
    /// Per-category and per-file failures are reported, not raised.
    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    /// Queue failure while feeding classification results.
    #[error(transparent)]
    Task(#[from] TaskError),
}

/// One item that failed during a scan, with a human-readable reason.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    /// What failed (category name, file path).
    pub subject: String,
    /// Why it failed.
    pub reason: String,
}

/// Outcome of a remote or local scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Categories seen by a remote scan; 0 for local scans.
    pub categories: usize,
    /// File records upserted.
    pub files: usize,
    /// Per-item failures that did not abort the scan.
    pub failures: Vec<ItemFailure>,
    /// Whether the scan stopped early on a cancellation request.
    pub cancelled: bool,
}

/// Which classification sets to feed into the download queue.
#[derive(Debug, Clone, Copy)]
pub struct EnqueueSelection {
    /// Enqueue files with no local counterpart.
    pub new: bool,
    /// Enqueue files whose remote size changed.
    pub updated: bool,
    /// Enqueue files failing local validation.
    pub corrupted: bool,
}

impl Default for EnqueueSelection {
    fn default() -> Self {
        Self {
            new: true,
            updated: true,
            corrupted: true,
        }
    }
}

/// Coordinates full sync cycles and their individual steps.
pub struct SyncOrchestrator {
    store: Store,
    scrapers: Arc<ScraperRegistry>,
    validators: Arc<ValidatorRegistry>,
    transport: Transport,
    events: EventSink,
    cancel: Arc<AtomicBool>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator over the given collaborators.
    #[must_use]
    pub fn new(
        store: Store,
        scrapers: Arc<ScraperRegistry>,
        validators: Arc<ValidatorRegistry>,
        transport: Transport,
        events: EventSink,
    ) -> Self {
        Self {
            store,
            scrapers,
            validators,
            transport,
            events,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the cooperative cancellation flag. Setting it stops scans at
    /// the next unit-of-work boundary (one category, one file).
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Scans a site's remote catalog, upserting categories and remote
    /// files. Rescans against unchanged remote data are idempotent: the
    /// (site, url) conflict keys make repeated upserts land on the same
    /// rows.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Scrape`] when the adapter is unknown or
    /// category discovery fails, [`SyncError::Store`] when the store is
    /// unavailable. Failures listing a single category are collected in
    /// the report instead.
    #[instrument(skip(self))]
    pub async fn scan_remote(&self, site_id: i64) -> Result<ScanReport, SyncError> {
        let site = self.store.require_site(site_id).await?;
        let scraper =
            self.scrapers
                .create(&site.scraper, &site.url, self.transport.clone())?;

        let descriptors = scraper.discover_categories().await?;
        let mut report = ScanReport::default();

        // First pass inserts every category as a root and maps the
        // scraper-local references onto store ids.
        let mut ref_to_id: HashMap<String, i64> = HashMap::new();
        for descriptor in &descriptors {
            let id = self
                .store
                .upsert_category(
                    site.id,
                    &CategoryUpsert {
                        name: &descriptor.name,
                        url: &descriptor.url,
                        parent_id: None,
                    },
                )
                .await?;
            ref_to_id.insert(descriptor.ref_id.clone(), id);
        }

        // Second pass wires parents now that every node has an id. A
        // cyclic or dangling parent demotes the category to a root and is
        // reported; the scan goes on.
        for descriptor in &descriptors {
            let Some(parent_ref) = &descriptor.parent_ref else {
                continue;
            };
            let Some(&parent_id) = ref_to_id.get(parent_ref) else {
                report.failures.push(ItemFailure {
                    subject: descriptor.name.clone(),
                    reason: format!("unknown parent category reference: {parent_ref}"),
                });
                continue;
            };
            let upsert = CategoryUpsert {
                name: &descriptor.name,
                url: &descriptor.url,
                parent_id: Some(parent_id),
            };
            match self.store.upsert_category(site.id, &upsert).await {
                Ok(_) => {}
                Err(StoreError::CategoryCycle { .. }) => {
                    warn!(category = %descriptor.name, "cyclic parent chain; kept as root");
                    report.failures.push(ItemFailure {
                        subject: descriptor.name.clone(),
                        reason: "parent chain loops; category kept as root".to_string(),
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
        report.categories = ref_to_id.len();

        let total = descriptors.len() as u64;
        for (index, descriptor) in descriptors.iter().enumerate() {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match scraper.list_files(&descriptor.ref_id).await {
                Ok(files) => {
                    for file in &files {
                        let category_id = ref_to_id.get(&file.category_ref).copied();
                        self.store
                            .upsert_remote_file(
                                site.id,
                                &RemoteFileUpsert {
                                    category_id,
                                    name: &file.name,
                                    url: &file.url,
                                    size: file.size.map(|s| s as i64),
                                    file_type: &file.file_type,
                                },
                            )
                            .await?;
                    }
                    report.files += files.len();
                }
                Err(e) => {
                    warn!(category = %descriptor.name, error = %e, "category listing failed");
                    report.failures.push(ItemFailure {
                        subject: descriptor.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }

            self.events.send(EngineEvent::Progress {
                stage: Stage::RemoteScan,
                done: (index + 1) as u64,
                total,
            });
        }

        if !report.cancelled {
            self.store.touch_site_scan(site.id).await?;
        }

        info!(
            site = %site.name,
            categories = report.categories,
            files = report.files,
            failures = report.failures.len(),
            cancelled = report.cancelled,
            "remote scan finished"
        );
        Ok(report)
    }

    /// Walks a local directory tree, upserting records for files with
    /// known extensions. Pre-existing files start unlinked; records
    /// created by the download engine keep their remote link.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] when the store is unavailable.
    /// Unreadable directories or files are reported per item.
    #[instrument(skip(self), fields(root = %root.display()))]
    pub async fn scan_local(&self, root: &Path) -> Result<ScanReport, SyncError> {
        let mut report = ScanReport::default();

        let (found, walk_failures) = collect_local_files(root);
        report.failures = walk_failures;

        let total = found.len() as u64;
        for (index, (path, size, file_type)) in found.iter().enumerate() {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }

            self.store
                .upsert_scanned_local_file(path, *size, file_type)
                .await?;
            report.files += 1;

            self.events.send(EngineEvent::Progress {
                stage: Stage::LocalScan,
                done: (index + 1) as u64,
                total,
            });
        }

        info!(
            files = report.files,
            failures = report.failures.len(),
            cancelled = report.cancelled,
            "local scan finished"
        );
        Ok(report)
    }

    /// Classifies remote vs local records for a scope and reports the
    /// result through the event sink.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] when the store cannot be read.
    #[instrument(skip(self))]
    pub async fn compare(&self, site_id: Option<i64>) -> Result<Classification, SyncError> {
        let engine = ComparisonEngine::new(self.store.clone(), Arc::clone(&self.validators));
        let classification = engine.compare(site_id).await?;

        self.events.send(EngineEvent::ComparisonFinished {
            new: classification.new.len(),
            updated: classification.updated.len(),
            corrupted: classification.corrupted.len(),
            ok: classification.ok.len(),
        });

        Ok(classification)
    }

    /// Feeds selected classification sets into the download queue.
    ///
    /// Files that already have an active task are skipped silently; the
    /// return value counts tasks actually created.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Task`] for queue failures other than
    /// duplicates.
    #[instrument(skip(self, classification))]
    pub async fn enqueue_classification(
        &self,
        classification: &Classification,
        selection: EnqueueSelection,
    ) -> Result<usize, SyncError> {
        let queue = TaskQueue::new(self.store.clone());
        let mut enqueued = 0usize;

        let mut sets: Vec<&[crate::compare::ComparedFile]> = Vec::new();
        if selection.new {
            sets.push(&classification.new);
        }
        if selection.updated {
            sets.push(&classification.updated);
        }
        if selection.corrupted {
            sets.push(&classification.corrupted);
        }

        for set in sets {
            for compared in set {
                match queue.enqueue(compared.remote.id, 0).await {
                    Ok(_) => enqueued += 1,
                    Err(TaskError::DuplicateTask { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        info!(enqueued, "classification fed into download queue");
        Ok(enqueued)
    }
}

/// Recursively collects files with known extensions under a root.
///
/// Returns (path, size, file-type) tuples plus per-item failures for
/// entries that could not be read.
fn collect_local_files(root: &Path) -> (Vec<(String, i64, &'static str)>, Vec<ItemFailure>) {
    let mut found = Vec::new();
    let mut failures = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                failures.push(ItemFailure {
                    subject: dir.to_string_lossy().into_owned(),
                    reason: format!("cannot read directory: {e}"),
                });
                continue;
            }
        };

        for entry in entries {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let Some(file_type) = file_type_for_path(&path.to_string_lossy()) else {
                continue;
            };
            match entry.metadata() {
                Ok(meta) => {
                    found.push((
                        path.to_string_lossy().into_owned(),
                        meta.len() as i64,
                        file_type,
                    ));
                }
                Err(e) => failures.push(ItemFailure {
                    subject: path.to_string_lossy().into_owned(),
                    reason: format!("cannot stat file: {e}"),
                }),
            }
        }
    }

    // Deterministic order regardless of directory iteration order.
    found.sort();
    (found, failures)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::db::Database;
    use crate::scraper::build_default_scraper_registry;

    async fn orchestrator() -> (SyncOrchestrator, Store) {
        let store = Store::new(Database::new_in_memory().await.unwrap());
        let orchestrator = SyncOrchestrator::new(
            store.clone(),
            Arc::new(build_default_scraper_registry()),
            Arc::new(ValidatorRegistry::with_builtins()),
            Transport::with_defaults().unwrap(),
            EventSink::disabled(),
        );
        (orchestrator, store)
    }

    #[tokio::test]
    async fn test_scan_remote_unknown_site() {
        let (orchestrator, _store) = orchestrator().await;
        let result = orchestrator.scan_remote(42).await;
        assert!(matches!(
            result,
            Err(SyncError::Store(StoreError::SiteNotFound(42)))
        ));
    }

    #[tokio::test]
    async fn test_scan_remote_unknown_adapter() {
        let (orchestrator, store) = orchestrator().await;
        let site_id = store
            .add_site("Archive A", "https://a.example", "gopher")
            .await
            .unwrap();

        let result = orchestrator.scan_remote(site_id).await;
        assert!(matches!(
            result,
            Err(SyncError::Scrape(ScrapeError::UnknownScraper { .. }))
        ));
    }

    #[tokio::test]
    async fn test_scan_local_picks_up_known_extensions() {
        let (orchestrator, store) = orchestrator().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::File::create(dir.path().join("a.pdf"))
            .unwrap()
            .write_all(b"%PDF-1.4 %%EOF")
            .unwrap();
        std::fs::File::create(dir.path().join("sub/b.txt"))
            .unwrap()
            .write_all(b"hello")
            .unwrap();
        std::fs::File::create(dir.path().join("skip.exe")).unwrap();

        let report = orchestrator.scan_local(dir.path()).await.unwrap();
        assert_eq!(report.files, 2);
        assert!(!report.cancelled);

        let local = store.list_local_files().await.unwrap();
        assert_eq!(local.len(), 2);
        assert!(local.iter().all(|f| f.remote_file_id.is_none()));
    }

    #[tokio::test]
    async fn test_scan_local_missing_root_reports_failure() {
        let (orchestrator, _store) = orchestrator().await;
        let report = orchestrator
            .scan_local(Path::new("/nonexistent/library"))
            .await
            .unwrap();
        assert_eq!(report.files, 0);
        assert_eq!(report.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_flag_stops_local_scan_early() {
        let (orchestrator, _store) = orchestrator().await;
        let dir = tempfile::tempdir().unwrap();
        for n in 0..5 {
            std::fs::File::create(dir.path().join(format!("{n}.txt"))).unwrap();
        }

        orchestrator.cancel_flag().store(true, Ordering::SeqCst);
        let report = orchestrator.scan_local(dir.path()).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.files, 0);
    }

    #[test]
    fn test_collect_local_files_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("b.txt")).unwrap();
        std::fs::File::create(dir.path().join("a.pdf")).unwrap();
        std::fs::File::create(dir.path().join("c.bin")).unwrap();

        let (found, failures) = collect_local_files(dir.path());
        assert!(failures.is_empty());
        let types: Vec<&str> = found.iter().map(|(_, _, t)| *t).collect();
        assert_eq!(types, vec!["pdf", "txt"]);
    }
}
