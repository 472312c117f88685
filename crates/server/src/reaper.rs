//! Background expiry of abandoned session directories.
//!
//! Age comes from the directory's filesystem timestamp, not from the registry
//! row. By default the row is left alone; `delete_orphan_rows` removes it too.

use crate::metrics;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tessera_core::config::ReaperConfig;
use tessera_metadata::MetadataStore;
use tessera_storage::{ChunkStore, SessionDirEntry, StorageResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Outcome of one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Directories inspected.
    pub scanned: usize,
    /// Expired directories removed.
    pub reaped: usize,
    /// Expired directories that could not be removed.
    pub failed: usize,
}

/// Deletes session directories older than the TTL.
pub struct ExpiryReaper {
    chunks: Arc<dyn ChunkStore>,
    metadata: Arc<dyn MetadataStore>,
    ttl: Duration,
    delete_orphan_rows: bool,
}

impl ExpiryReaper {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        metadata: Arc<dyn MetadataStore>,
        config: &ReaperConfig,
    ) -> Self {
        Self {
            chunks,
            metadata,
            ttl: config.session_ttl(),
            delete_orphan_rows: config.delete_orphan_rows,
        }
    }

    /// Sweep once against the current clock.
    pub async fn sweep_once(&self) -> StorageResult<SweepReport> {
        self.sweep_at(SystemTime::now()).await
    }

    /// Sweep once as if the clock read `now`.
    ///
    /// Only a failure to list the temp root is an error; failures on single
    /// directories are counted and logged.
    pub async fn sweep_at(&self, now: SystemTime) -> StorageResult<SweepReport> {
        let entries = self.chunks.list_session_dirs().await?;
        let mut report = SweepReport {
            scanned: entries.len(),
            ..SweepReport::default()
        };

        for entry in entries.iter().filter(|e| self.is_expired(e, now)) {
            match self.chunks.remove_session_dir(&entry.name).await {
                Ok(()) => {
                    report.reaped += 1;
                    tracing::info!(dir = %entry.name, "Reaped expired session directory");
                    if self.delete_orphan_rows {
                        self.delete_row(entry).await;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(dir = %entry.name, error = %e, "Failed to reap session directory");
                }
            }
        }

        metrics::REAPER_SWEEPS.inc();
        metrics::REAPER_DIRS_REAPED.inc_by(report.reaped as u64);
        metrics::REAPER_FAILURES.inc_by(report.failed as u64);
        tracing::info!(
            scanned = report.scanned,
            reaped = report.reaped,
            failed = report.failed,
            "Reaper sweep finished"
        );
        Ok(report)
    }

    fn is_expired(&self, entry: &SessionDirEntry, now: SystemTime) -> bool {
        // A timestamp in the future counts as age zero.
        now.duration_since(entry.created)
            .is_ok_and(|age| age > self.ttl)
    }

    async fn delete_row(&self, entry: &SessionDirEntry) {
        let Some(session_id) = entry.session_id else {
            return;
        };
        match self.metadata.delete_session(*session_id.as_uuid()).await {
            Ok(true) => tracing::info!(session_id = %session_id, "Deleted orphaned session row"),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to delete orphaned session row");
            }
        }
    }

    /// Run sweeps every `interval` until the returned handle is shut down.
    /// The first sweep runs immediately.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            tracing::error!(error = %e, "Reaper sweep failed");
                        }
                    }
                }
            }
            tracing::info!("Reaper stopped");
        });

        ReaperHandle { shutdown_tx, task }
    }
}

/// Handle to a running reaper task.
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal shutdown and wait for the task. A sweep in progress finishes
    /// first.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Reaper task did not stop cleanly");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
