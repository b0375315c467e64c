//! End-to-end tests for the sync pipeline against a mock HTTP server:
//! remote scan → comparison → queue → download engine → re-comparison.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shelfsync_core::store::RemoteFileUpsert;
use shelfsync_core::{
    Database, DownloadEngine, EnqueueSelection, EventSink, QueueControl, RateLimiter,
    RetryPolicy, RunEnv, Store, SyncOrchestrator, TaskQueue, TaskStatus, Transport,
    ValidatorRegistry, build_default_scraper_registry,
};

/// A structurally valid PDF body padded to exactly `size` bytes.
fn pdf_body(size: usize) -> Vec<u8> {
    let header = b"%PDF-1.4\n";
    let trailer = b"\n%%EOF\n";
    let padding = size
        .checked_sub(header.len() + trailer.len())
        .expect("size too small for a pdf body");
    let mut body = Vec::with_capacity(size);
    body.extend_from_slice(header);
    body.extend(std::iter::repeat_n(b'x', padding));
    body.extend_from_slice(trailer);
    body
}

struct Fixture {
    store: Store,
    orchestrator: SyncOrchestrator,
    root: TempDir,
    _db_dir: TempDir,
}

async fn fixture() -> Fixture {
    let db_dir = TempDir::new().expect("temp dir");
    let db = Database::new(&db_dir.path().join("catalog.db"))
        .await
        .expect("database");
    let store = Store::new(db);
    let orchestrator = SyncOrchestrator::new(
        store.clone(),
        Arc::new(build_default_scraper_registry()),
        Arc::new(ValidatorRegistry::with_builtins()),
        Transport::with_defaults().expect("transport"),
        EventSink::disabled(),
    );
    Fixture {
        store,
        orchestrator,
        root: TempDir::new().expect("root dir"),
        _db_dir: db_dir,
    }
}

fn engine_env(fixture: &Fixture) -> RunEnv {
    RunEnv {
        store: fixture.store.clone(),
        scrapers: Arc::new(build_default_scraper_registry()),
        validators: Arc::new(ValidatorRegistry::with_builtins()),
        transport: Transport::with_defaults().expect("transport"),
        root: fixture.root.path().to_path_buf(),
        events: EventSink::disabled(),
    }
}

fn quick_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(10),
        Duration::from_millis(40),
        2.0,
    )
}

/// Serves a listing page with the given file links.
async fn mount_listing(server: &MockServer, links: &[&str]) {
    let anchors: String = links
        .iter()
        .map(|link| format!(r#"<li><a href="{link}">{link}</a></li>"#))
        .collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(format!("<html><ul>{anchors}</ul></html>")),
        )
        .mount(server)
        .await;
}

fn assert_no_partial_files(root: &std::path::Path) {
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                assert!(
                    path.extension().is_none_or(|ext| ext != "part"),
                    "partial file left behind: {}",
                    path.display()
                );
            }
        }
    }
}

// ==================== End-to-end scenario ====================

#[tokio::test]
async fn test_end_to_end_new_file_becomes_ok() {
    let server = MockServer::start().await;
    mount_listing(&server, &["/files/a.pdf"]).await;
    Mock::given(method("GET"))
        .and(path("/files/a.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_body(1000)))
        .mount(&server)
        .await;

    let fixture = fixture().await;
    let site_id = fixture
        .store
        .add_site("Archive A", &server.uri(), "link-list")
        .await
        .unwrap();

    // Scan populates the catalog; the site reports a known size.
    let report = fixture.orchestrator.scan_remote(site_id).await.unwrap();
    assert_eq!(report.files, 1);
    assert!(report.failures.is_empty());

    let remote = fixture
        .store
        .remote_files_in_scope(Some(site_id))
        .await
        .unwrap()
        .remove(0);
    fixture
        .store
        .upsert_remote_file(
            site_id,
            &RemoteFileUpsert {
                category_id: remote.category_id,
                name: &remote.name,
                url: &remote.url,
                size: Some(1000),
                file_type: &remote.file_type,
            },
        )
        .await
        .unwrap();

    // No local file exists: classification says new.
    let classification = fixture.orchestrator.compare(Some(site_id)).await.unwrap();
    assert_eq!(classification.new.len(), 1);
    assert_eq!(classification.ok.len(), 0);

    let enqueued = fixture
        .orchestrator
        .enqueue_classification(&classification, EnqueueSelection::default())
        .await
        .unwrap();
    assert_eq!(enqueued, 1);

    // Drain the queue with concurrency 1.
    let engine = DownloadEngine::new(
        1,
        quick_retry(2),
        Arc::new(RateLimiter::disabled()),
        QueueControl::new(),
    )
    .unwrap();
    let stats = engine.run(&engine_env(&fixture)).await.unwrap();
    assert_eq!(stats.completed(), 1);
    assert_eq!(stats.failed(), 0);

    // The task is terminal and linked to a local file of the right size.
    let task = fixture
        .store
        .list_tasks(Some(TaskStatus::Completed))
        .await
        .unwrap()
        .remove(0);
    let local_id = task.local_file_id.expect("completed task links a local file");
    let local = fixture.store.get_local_file(local_id).await.unwrap().unwrap();
    assert_eq!(local.remote_file_id, Some(remote.id));
    assert_eq!(local.size, 1000);
    assert!(local.validation_error.is_none());

    let on_disk = std::fs::read(&local.path).unwrap();
    assert_eq!(on_disk.len(), 1000);
    assert!(on_disk.starts_with(b"%PDF-"));
    assert_no_partial_files(fixture.root.path());

    // A second comparison reports the file as ok; nothing re-queues.
    let second = fixture.orchestrator.compare(Some(site_id)).await.unwrap();
    assert_eq!(second.ok.len(), 1);
    assert_eq!(second.pending_transfers(), 0);
    let re_enqueued = fixture
        .orchestrator
        .enqueue_classification(&second, EnqueueSelection::default())
        .await
        .unwrap();
    assert_eq!(re_enqueued, 0);
}

// ==================== Idempotent rescans ====================

#[tokio::test]
async fn test_rescan_is_idempotent() {
    let server = MockServer::start().await;
    mount_listing(&server, &["/files/a.pdf", "/files/b.epub"]).await;

    let fixture = fixture().await;
    let site_id = fixture
        .store
        .add_site("Archive A", &server.uri(), "link-list")
        .await
        .unwrap();

    let first = fixture.orchestrator.scan_remote(site_id).await.unwrap();
    let second = fixture.orchestrator.scan_remote(site_id).await.unwrap();
    assert_eq!(first.files, 2);
    assert_eq!(second.files, 2);

    let remote = fixture
        .store
        .remote_files_in_scope(Some(site_id))
        .await
        .unwrap();
    assert_eq!(remote.len(), 2, "rescan must not duplicate rows");
    let categories = fixture.store.categories_for_site(site_id).await.unwrap();
    assert_eq!(categories.len(), 1);

    // Classification is unchanged by the rescan: both files still new.
    let classification = fixture.orchestrator.compare(Some(site_id)).await.unwrap();
    assert_eq!(classification.new.len(), 2);
    assert_eq!(classification.total(), 2);
}

// ==================== Retry exhaustion ====================

#[tokio::test]
async fn test_retry_exhaustion_marks_failed_with_last_error() {
    let server = MockServer::start().await;
    mount_listing(&server, &["/files/flaky.pdf"]).await;
    Mock::given(method("GET"))
        .and(path("/files/flaky.pdf"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let fixture = fixture().await;
    let site_id = fixture
        .store
        .add_site("Archive A", &server.uri(), "link-list")
        .await
        .unwrap();
    fixture.orchestrator.scan_remote(site_id).await.unwrap();
    let classification = fixture.orchestrator.compare(Some(site_id)).await.unwrap();
    fixture
        .orchestrator
        .enqueue_classification(&classification, EnqueueSelection::default())
        .await
        .unwrap();

    let engine = DownloadEngine::new(
        1,
        quick_retry(3),
        Arc::new(RateLimiter::disabled()),
        QueueControl::new(),
    )
    .unwrap();
    let stats = engine.run(&engine_env(&fixture)).await.unwrap();
    assert_eq!(stats.failed(), 1);
    assert_eq!(stats.retried(), 2, "two retries after the first attempt");

    let task = fixture
        .store
        .list_tasks(Some(TaskStatus::Failed))
        .await
        .unwrap()
        .remove(0);
    assert_eq!(task.retry_count, 2);
    let error = task.last_error.expect("failure reason recorded");
    assert!(error.contains("500"), "verbatim error, got: {error}");
    assert_no_partial_files(fixture.root.path());

    // MockServer verifies the expect(3) attempt count on drop.
}

// ==================== Rate limiting ====================

#[tokio::test]
async fn test_same_site_downloads_are_spaced() {
    let server = MockServer::start().await;
    let links = ["/files/a.pdf", "/files/b.pdf", "/files/c.pdf"];
    mount_listing(&server, &links).await;
    for link in &links {
        Mock::given(method("GET"))
            .and(path(*link))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_body(64)))
            .mount(&server)
            .await;
    }

    let fixture = fixture().await;
    let site_id = fixture
        .store
        .add_site("Archive A", &server.uri(), "link-list")
        .await
        .unwrap();
    fixture.orchestrator.scan_remote(site_id).await.unwrap();
    let classification = fixture.orchestrator.compare(Some(site_id)).await.unwrap();
    fixture
        .orchestrator
        .enqueue_classification(&classification, EnqueueSelection::default())
        .await
        .unwrap();

    let engine = DownloadEngine::new(
        3,
        quick_retry(1),
        Arc::new(RateLimiter::new(Duration::from_millis(150))),
        QueueControl::new(),
    )
    .unwrap();

    let start = Instant::now();
    let stats = engine.run(&engine_env(&fixture)).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(stats.completed(), 3);
    // Three transfers to one site with 150ms spacing: at least 2 * 150ms.
    assert!(
        elapsed >= Duration::from_millis(300),
        "elapsed {elapsed:?} under the spacing floor"
    );
}

// ==================== Pause / stop / cancel ====================

#[tokio::test]
async fn test_pause_blocks_claiming_until_resume() {
    let server = MockServer::start().await;
    mount_listing(&server, &["/files/a.pdf"]).await;
    Mock::given(method("GET"))
        .and(path("/files/a.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_body(64)))
        .mount(&server)
        .await;

    let fixture = fixture().await;
    let site_id = fixture
        .store
        .add_site("Archive A", &server.uri(), "link-list")
        .await
        .unwrap();
    fixture.orchestrator.scan_remote(site_id).await.unwrap();
    let classification = fixture.orchestrator.compare(Some(site_id)).await.unwrap();
    fixture
        .orchestrator
        .enqueue_classification(&classification, EnqueueSelection::default())
        .await
        .unwrap();

    let control = QueueControl::new();
    control.pause();

    let engine = DownloadEngine::new(
        1,
        quick_retry(1),
        Arc::new(RateLimiter::disabled()),
        Arc::clone(&control),
    )
    .unwrap();
    let env = engine_env(&fixture);
    let run = tokio::spawn(async move { engine.run(&env).await });

    tokio::time::sleep(Duration::from_millis(150)).await;
    let queue = TaskQueue::new(fixture.store.clone());
    assert_eq!(
        queue.count(TaskStatus::Pending).await.unwrap(),
        1,
        "paused engine must not claim tasks"
    );

    control.resume();
    let stats = run.await.unwrap().unwrap();
    assert_eq!(stats.completed(), 1);
}

#[tokio::test]
async fn test_stop_before_run_claims_nothing() {
    let fixture = fixture().await;
    let site_id = fixture
        .store
        .add_site("Archive A", "https://a.example", "link-list")
        .await
        .unwrap();
    let remote_id = fixture
        .store
        .upsert_remote_file(
            site_id,
            &RemoteFileUpsert {
                category_id: None,
                name: "a.pdf",
                url: "https://a.example/a.pdf",
                size: None,
                file_type: "pdf",
            },
        )
        .await
        .unwrap();
    TaskQueue::new(fixture.store.clone())
        .enqueue(remote_id, 0)
        .await
        .unwrap();

    let control = QueueControl::new();
    control.stop();

    let engine = DownloadEngine::new(
        1,
        quick_retry(1),
        Arc::new(RateLimiter::disabled()),
        Arc::clone(&control),
    )
    .unwrap();
    let stats = engine.run(&engine_env(&fixture)).await.unwrap();

    assert_eq!(stats.total(), 0);
    assert_eq!(
        fixture.store.count_tasks(TaskStatus::Pending).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_cancel_aborts_in_flight_and_discards_partial() {
    let server = MockServer::start().await;
    mount_listing(&server, &["/files/slow.pdf"]).await;
    Mock::given(method("GET"))
        .and(path("/files/slow.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(pdf_body(4096))
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&server)
        .await;

    let fixture = fixture().await;
    let site_id = fixture
        .store
        .add_site("Archive A", &server.uri(), "link-list")
        .await
        .unwrap();
    fixture.orchestrator.scan_remote(site_id).await.unwrap();
    let classification = fixture.orchestrator.compare(Some(site_id)).await.unwrap();
    fixture
        .orchestrator
        .enqueue_classification(&classification, EnqueueSelection::default())
        .await
        .unwrap();

    let control = QueueControl::new();
    let engine = DownloadEngine::new(
        1,
        quick_retry(3),
        Arc::new(RateLimiter::disabled()),
        Arc::clone(&control),
    )
    .unwrap();
    let env = engine_env(&fixture);
    let run = tokio::spawn(async move { engine.run(&env).await });

    tokio::time::sleep(Duration::from_millis(150)).await;
    let in_progress = fixture
        .store
        .list_tasks(Some(TaskStatus::InProgress))
        .await
        .unwrap();
    assert_eq!(in_progress.len(), 1);
    assert!(control.cancel(in_progress[0].id));

    let stats = run.await.unwrap().unwrap();
    assert_eq!(stats.failed(), 1);

    let task = fixture
        .store
        .get_task(in_progress[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status(), TaskStatus::Failed);
    assert_eq!(task.last_error.as_deref(), Some("cancelled by operator"));

    assert_no_partial_files(fixture.root.path());
    assert!(fixture.store.list_local_files().await.unwrap().is_empty());
}

// ==================== Validation after transfer ====================

#[tokio::test]
async fn test_invalid_body_completes_task_and_compares_corrupted() {
    let server = MockServer::start().await;
    mount_listing(&server, &["/files/broken.pdf"]).await;
    Mock::given(method("GET"))
        .and(path("/files/broken.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"<html>error page</html>".to_vec()))
        .mount(&server)
        .await;

    let fixture = fixture().await;
    let site_id = fixture
        .store
        .add_site("Archive A", &server.uri(), "link-list")
        .await
        .unwrap();
    fixture.orchestrator.scan_remote(site_id).await.unwrap();
    let classification = fixture.orchestrator.compare(Some(site_id)).await.unwrap();
    fixture
        .orchestrator
        .enqueue_classification(&classification, EnqueueSelection::default())
        .await
        .unwrap();

    let engine = DownloadEngine::new(
        1,
        quick_retry(1),
        Arc::new(RateLimiter::disabled()),
        QueueControl::new(),
    )
    .unwrap();
    let stats = engine.run(&engine_env(&fixture)).await.unwrap();

    // Download success and content validity are orthogonal: the task
    // completes, the invalid content is recorded on the local file.
    assert_eq!(stats.completed(), 1);
    assert_eq!(stats.failed(), 0);

    let local = fixture.store.list_local_files().await.unwrap().remove(0);
    assert!(local.validation_error.is_some());

    let second = fixture.orchestrator.compare(Some(site_id)).await.unwrap();
    assert_eq!(second.corrupted.len(), 1);
    assert!(
        second.corrupted[0]
            .reason
            .as_deref()
            .unwrap()
            .contains("%PDF-")
    );
}
