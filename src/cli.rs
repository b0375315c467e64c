//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use shelfsync_core::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES};

/// Keep a local document collection synchronized with remote catalogs.
///
/// Shelfsync scans remote sites through scraper adapters, compares what
/// they advertise against what exists locally, and downloads the
/// difference with rate limiting and validation.
#[derive(Parser, Debug)]
#[command(name = "shelfsync")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the JSON config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the catalog database (overrides config)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage registered sites
    Site {
        #[command(subcommand)]
        action: SiteAction,
    },

    /// Scan a site's remote catalog into the store
    Scan {
        /// Site id to scan
        site_id: i64,
    },

    /// Scan a local directory tree into the store
    ScanLocal {
        /// Root directory to walk
        root: PathBuf,
    },

    /// Classify remote files against local files
    Compare {
        /// Restrict to one site
        #[arg(long)]
        site: Option<i64>,
    },

    /// Feed comparison results into the download queue
    Enqueue {
        /// Restrict to one site
        #[arg(long)]
        site: Option<i64>,

        /// Leave out files with no local counterpart
        #[arg(long)]
        skip_new: bool,

        /// Leave out files whose remote size changed
        #[arg(long)]
        skip_updated: bool,

        /// Leave out files failing local validation
        #[arg(long)]
        skip_corrupted: bool,
    },

    /// Inspect or edit queued downloads
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Drain the download queue
    Run {
        #[command(flatten)]
        options: RunOptions,
    },

    /// Full cycle for one site: scan, compare, enqueue, run
    Sync {
        /// Site id to synchronize
        site_id: i64,

        #[command(flatten)]
        options: RunOptions,
    },
}

/// Site management subcommands.
#[derive(Subcommand, Debug)]
pub enum SiteAction {
    /// Register a site
    Add {
        /// Display name
        name: String,
        /// Base URL (unique)
        url: String,
        /// Scraper adapter identifier
        #[arg(long, default_value = "link-list")]
        scraper: String,
    },
    /// List registered sites
    List,
    /// Remove a site and its remote records
    Remove {
        /// Site id
        id: i64,
    },
}

/// Queue management subcommands.
#[derive(Subcommand, Debug)]
pub enum QueueAction {
    /// List tasks
    List,
    /// Remove a pending task
    Remove {
        /// Task id
        id: i64,
    },
    /// Change a pending task's priority
    Reorder {
        /// Task id
        id: i64,
        /// New priority (higher runs first)
        priority: i64,
    },
}

/// Options shared by `run` and `sync`.
#[derive(Parser, Debug, Clone)]
pub struct RunOptions {
    /// Maximum concurrent downloads (1-16)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub concurrency: u8,

    /// Maximum retry attempts for transient failures (1-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: u8,

    /// Minimum delay between requests to the same site in milliseconds (0 to disable, max 60000)
    #[arg(short = 'l', long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: u64,

    /// Download root directory (overrides config)
    #[arg(long)]
    pub root: Option<PathBuf>,
}
