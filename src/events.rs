//! Engine → presentation event stream.
//!
//! Long-running operations report incremental progress and task state
//! changes through an [`EventSink`]. Emission never blocks: with no
//! subscriber attached (or one that went away) events are dropped
//! silently, so the engine never stalls on a slow or absent UI.

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::store::TaskStatus;

/// The long-running operation an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Remote catalog scan (categories and file listings).
    RemoteScan,
    /// Local directory scan.
    LocalScan,
    /// Remote/local comparison.
    Compare,
    /// Download queue run.
    Download,
}

/// Events emitted by the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum EngineEvent {
    /// Incremental progress within a stage.
    Progress {
        /// The operation making progress.
        stage: Stage,
        /// Units finished so far.
        done: u64,
        /// Total units, when known up front.
        total: u64,
    },

    /// A download task changed lifecycle state.
    TaskStateChanged {
        /// The task's store id.
        task_id: i64,
        /// Its new status.
        status: TaskStatus,
    },

    /// A comparison finished with these set sizes.
    ComparisonFinished {
        /// Files with no local counterpart.
        new: usize,
        /// Files whose remote size changed.
        updated: usize,
        /// Files failing local validation.
        corrupted: usize,
        /// Files in sync.
        ok: usize,
    },
}

/// Cloneable event emitter handed to engine components.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<EngineEvent>>,
}

impl EventSink {
    /// Creates a sink/receiver pair for a subscriber.
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Creates a sink that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emits an event. Never blocks; a missing or closed subscriber is
    /// not an error.
    pub fn send(&self, event: EngineEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
