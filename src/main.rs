//! CLI entry point for shelfsync.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use shelfsync_core::config::FileConfig;
use shelfsync_core::store::TaskStatus;
use shelfsync_core::{
    Classification, Database, DownloadEngine, EngineEvent, EnqueueSelection, EventSink,
    QueueControl, RateLimiter, RetryPolicy, RunEnv, Store, SyncOrchestrator, TaskQueue,
    Transport, ValidatorRegistry, build_default_scraper_registry,
};

mod cli;

use cli::{Args, Command, QueueAction, RunOptions, SiteAction};

/// Default config file looked up next to the working directory.
const DEFAULT_CONFIG_PATH: &str = "shelfsync.json";

/// Default catalog database path.
const DEFAULT_DB_PATH: &str = "shelfsync.db";

/// Default download root.
const DEFAULT_ROOT: &str = "library";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = FileConfig::load_or_default(&config_path)?;

    let db_path = args
        .db
        .clone()
        .or_else(|| config.database.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
    let db = Database::new(&db_path)
        .await
        .with_context(|| format!("cannot open catalog database {}", db_path.display()))?;
    let store = Store::new(db);

    let transport = Transport::new(&config.transport_config())?;
    let scrapers = Arc::new(build_default_scraper_registry());
    let validators = Arc::new(ValidatorRegistry::with_builtins());

    match args.command {
        Command::Site { action } => handle_site(&store, action).await?,
        Command::Scan { site_id } => {
            let (events, rx) = EventSink::channel();
            let progress = spawn_progress(rx, args.quiet);
            let orchestrator = SyncOrchestrator::new(
                store,
                scrapers,
                validators,
                transport,
                events,
            );
            let report = orchestrator.scan_remote(site_id).await?;
            drop(orchestrator);
            progress.await.ok();
            print_scan_report(&report);
        }
        Command::ScanLocal { root } => {
            let (events, rx) = EventSink::channel();
            let progress = spawn_progress(rx, args.quiet);
            let orchestrator = SyncOrchestrator::new(
                store,
                scrapers,
                validators,
                transport,
                events,
            );
            let report = orchestrator.scan_local(&root).await?;
            drop(orchestrator);
            progress.await.ok();
            print_scan_report(&report);
        }
        Command::Compare { site } => {
            let orchestrator = SyncOrchestrator::new(
                store,
                scrapers,
                validators,
                transport,
                EventSink::disabled(),
            );
            let classification = orchestrator.compare(site).await?;
            print_classification(&classification);
        }
        Command::Enqueue {
            site,
            skip_new,
            skip_updated,
            skip_corrupted,
        } => {
            let orchestrator = SyncOrchestrator::new(
                store,
                scrapers,
                validators,
                transport,
                EventSink::disabled(),
            );
            let classification = orchestrator.compare(site).await?;
            let selection = EnqueueSelection {
                new: !skip_new,
                updated: !skip_updated,
                corrupted: !skip_corrupted,
            };
            let enqueued = orchestrator
                .enqueue_classification(&classification, selection)
                .await?;
            println!("{enqueued} task(s) enqueued");
        }
        Command::Queue { action } => handle_queue(&store, action).await?,
        Command::Run { options } => {
            run_queue(&store, &scrapers, &validators, &transport, &config, &options, args.quiet)
                .await?;
        }
        Command::Sync { site_id, options } => {
            let (events, rx) = EventSink::channel();
            let progress = spawn_progress(rx, args.quiet);
            let orchestrator = SyncOrchestrator::new(
                store.clone(),
                Arc::clone(&scrapers),
                Arc::clone(&validators),
                transport.clone(),
                events,
            );

            let report = orchestrator.scan_remote(site_id).await?;
            print_scan_report(&report);

            let classification = orchestrator.compare(Some(site_id)).await?;
            print_classification(&classification);

            let enqueued = orchestrator
                .enqueue_classification(&classification, EnqueueSelection::default())
                .await?;
            info!(enqueued, "queued transfers");
            drop(orchestrator);
            progress.await.ok();

            run_queue(&store, &scrapers, &validators, &transport, &config, &options, args.quiet)
                .await?;
        }
    }

    Ok(())
}

async fn handle_site(store: &Store, action: SiteAction) -> Result<()> {
    match action {
        SiteAction::Add { name, url, scraper } => {
            let id = store.add_site(&name, &url, &scraper).await?;
            println!("site {id} registered: {name} ({url}, adapter {scraper})");
        }
        SiteAction::List => {
            let sites = store.list_sites().await?;
            if sites.is_empty() {
                println!("no sites registered");
            }
            for site in sites {
                println!(
                    "{:>4}  {}  {}  adapter={}  last scan: {}",
                    site.id,
                    site.name,
                    site.url,
                    site.scraper,
                    site.last_scan_at.as_deref().unwrap_or("never"),
                );
            }
        }
        SiteAction::Remove { id } => {
            store.remove_site(id).await?;
            println!("site {id} removed");
        }
    }
    Ok(())
}

async fn handle_queue(store: &Store, action: QueueAction) -> Result<()> {
    let queue = TaskQueue::new(store.clone());
    match action {
        QueueAction::List => {
            let tasks = queue.list(None).await?;
            if tasks.is_empty() {
                println!("queue is empty");
            }
            for task in tasks {
                println!(
                    "{:>4}  remote={:<5} priority={:<3} {:<12} {}",
                    task.id,
                    task.remote_file_id,
                    task.priority,
                    task.status().to_string(),
                    task.last_error.as_deref().unwrap_or(""),
                );
            }
        }
        QueueAction::Remove { id } => {
            queue.remove(id).await?;
            println!("task {id} removed");
        }
        QueueAction::Reorder { id, priority } => {
            queue.reorder(id, priority).await?;
            println!("task {id} priority set to {priority}");
        }
    }
    Ok(())
}

async fn run_queue(
    store: &Store,
    scrapers: &Arc<shelfsync_core::ScraperRegistry>,
    validators: &Arc<ValidatorRegistry>,
    transport: &Transport,
    config: &FileConfig,
    options: &RunOptions,
    quiet: bool,
) -> Result<()> {
    let queue = TaskQueue::new(store.clone());
    let recovered = queue.recover_interrupted().await?;
    if recovered > 0 {
        info!(recovered, "returned interrupted tasks to pending");
    }

    let pending = queue.count(TaskStatus::Pending).await?;
    if pending == 0 {
        println!("nothing to download");
        return Ok(());
    }

    let rate_limiter = if options.rate_limit == 0 {
        Arc::new(RateLimiter::disabled())
    } else {
        Arc::new(RateLimiter::new(Duration::from_millis(options.rate_limit)))
    };
    let retry_policy = RetryPolicy::with_max_attempts(u32::from(options.max_retries));
    let control = QueueControl::new();

    // Ctrl-C aborts in-flight transfers; partial files are discarded.
    {
        let control = Arc::clone(&control);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling transfers");
                control.cancel_all();
            }
        });
    }

    let engine = DownloadEngine::new(
        usize::from(options.concurrency),
        retry_policy,
        rate_limiter,
        control,
    )?;

    let root = options
        .root
        .clone()
        .or_else(|| config.download_root.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT));

    let (events, rx) = EventSink::channel();
    let progress = spawn_progress(rx, quiet);

    let env = RunEnv {
        store: store.clone(),
        scrapers: Arc::clone(scrapers),
        validators: Arc::clone(validators),
        transport: transport.clone(),
        root,
        events,
    };

    let stats = engine.run(&env).await?;
    drop(env);
    progress.await.ok();

    println!(
        "downloads finished: {} completed, {} failed, {} retries",
        stats.completed(),
        stats.failed(),
        stats.retried()
    );
    Ok(())
}

/// Renders engine events as a progress bar until the sink closes.
fn spawn_progress(
    mut rx: UnboundedReceiver<EngineEvent>,
    quiet: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(0);
            if let Ok(style) =
                ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
            {
                bar.set_style(style);
            }
            bar
        };

        while let Some(event) = rx.recv().await {
            match event {
                EngineEvent::Progress { done, total, .. } => {
                    bar.set_length(total);
                    bar.set_position(done);
                }
                EngineEvent::TaskStateChanged { task_id, status } => {
                    bar.set_message(format!("task {task_id}: {status}"));
                }
                EngineEvent::ComparisonFinished {
                    new,
                    updated,
                    corrupted,
                    ok,
                } => {
                    bar.set_message(format!(
                        "compared: {new} new, {updated} updated, {corrupted} corrupted, {ok} ok"
                    ));
                }
            }
        }
        bar.finish_and_clear();
    })
}

fn print_scan_report(report: &shelfsync_core::ScanReport) {
    println!(
        "scan finished: {} categories, {} files{}",
        report.categories,
        report.files,
        if report.cancelled { " (cancelled)" } else { "" },
    );
    for failure in &report.failures {
        println!("  failed: {} - {}", failure.subject, failure.reason);
    }
}

fn print_classification(classification: &Classification) {
    println!(
        "comparison: {} new, {} updated, {} corrupted, {} ok",
        classification.new.len(),
        classification.updated.len(),
        classification.corrupted.len(),
        classification.ok.len(),
    );
    for compared in &classification.corrupted {
        if let Some(reason) = &compared.reason {
            println!("  corrupted: {} - {}", compared.remote.name, reason);
        }
    }
}
