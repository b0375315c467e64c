//! Comparison engine: classifies the delta between remote and local
//! records for a scope (one site or all).
//!
//! For a fixed store state the classification is a pure function of stored
//! metadata plus a local structural read for validation; it never re-fetches
//! remote content. Size mismatch takes precedence over validation: a
//! changed remote file is reported as updated even when the stale local
//! copy still validates.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::store::{LocalFile, RemoteFile, Store, StoreError};
use crate::validate::ValidatorRegistry;

/// One classified (remote, local) pair.
#[derive(Debug, Clone)]
pub struct ComparedFile {
    /// The remote record driving the classification.
    pub remote: RemoteFile,
    /// The matching local record, when one exists.
    pub local: Option<LocalFile>,
    /// Human-readable reason (validator error for corrupted entries,
    /// size delta for updated entries).
    pub reason: Option<String>,
}

/// The four-way partition of remote files in scope.
///
/// Every remote file in scope lands in exactly one set.
#[derive(Debug, Default)]
pub struct Classification {
    /// No local counterpart exists.
    pub new: Vec<ComparedFile>,
    /// Local exists but the remote size changed.
    pub updated: Vec<ComparedFile>,
    /// Local exists, sizes are not known to differ, but the file fails
    /// structural validation.
    pub corrupted: Vec<ComparedFile>,
    /// Local exists and validates.
    pub ok: Vec<ComparedFile>,
}

impl Classification {
    /// Total number of classified files.
    #[must_use]
    pub fn total(&self) -> usize {
        self.new.len() + self.updated.len() + self.corrupted.len() + self.ok.len()
    }

    /// Number of files that need a transfer (everything but ok).
    #[must_use]
    pub fn pending_transfers(&self) -> usize {
        self.new.len() + self.updated.len() + self.corrupted.len()
    }
}

/// Classifies remote files against their local counterparts.
pub struct ComparisonEngine {
    store: Store,
    validators: Arc<ValidatorRegistry>,
}

impl ComparisonEngine {
    /// Creates a comparison engine over a store and validator registry.
    #[must_use]
    pub fn new(store: Store, validators: Arc<ValidatorRegistry>) -> Self {
        Self { store, validators }
    }

    /// Computes the classification for a scope (one site, or all when
    /// `site_id` is None).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read; local file
    /// reads never error (an unreadable file classifies as corrupted).
    #[instrument(skip(self))]
    pub async fn compare(&self, site_id: Option<i64>) -> Result<Classification, StoreError> {
        let remote_files = self.store.remote_files_in_scope(site_id).await?;
        debug!(count = remote_files.len(), "comparing remote files");

        let mut classification = Classification::default();

        for remote in remote_files {
            let local = self.store.local_file_by_remote_id(remote.id).await?;
            let compared = self.classify(remote, local);
            match compared {
                Classified::New(pair) => classification.new.push(pair),
                Classified::Updated(pair) => classification.updated.push(pair),
                Classified::Corrupted(pair) => classification.corrupted.push(pair),
                Classified::Ok(pair) => classification.ok.push(pair),
            }
        }

        info!(
            new = classification.new.len(),
            updated = classification.updated.len(),
            corrupted = classification.corrupted.len(),
            ok = classification.ok.len(),
            "comparison finished"
        );

        Ok(classification)
    }

    fn classify(&self, remote: RemoteFile, local: Option<LocalFile>) -> Classified {
        let Some(local) = local else {
            return Classified::New(ComparedFile {
                remote,
                local: None,
                reason: None,
            });
        };

        // Size mismatch wins over validation; a null size on either side
        // cannot be compared and falls through to the structural check.
        if let Some(remote_size) = remote.size {
            if remote_size != local.size {
                let reason = format!("remote size {remote_size}, local size {}", local.size);
                return Classified::Updated(ComparedFile {
                    remote,
                    local: Some(local),
                    reason: Some(reason),
                });
            }
        }

        let result = self
            .validators
            .validate(Path::new(&local.path), Some(&local.file_type));

        if result.valid {
            Classified::Ok(ComparedFile {
                remote,
                local: Some(local),
                reason: None,
            })
        } else {
            let reason = result
                .error
                .unwrap_or_else(|| "failed validation".to_string());
            Classified::Corrupted(ComparedFile {
                remote,
                local: Some(local),
                reason: Some(reason),
            })
        }
    }
}

enum Classified {
    New(ComparedFile),
    Updated(ComparedFile),
    Corrupted(ComparedFile),
    Ok(ComparedFile),
}
