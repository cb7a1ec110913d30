// Archival of closed buckets, one serial coordinator per book.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::persist::staging::StagingArtifact;
use crate::persist::{ArchiveKey, ArchiveStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Rollover,
    Recovery,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct FlushJob {
    pub artifact: StagingArtifact,
    pub reason: FlushReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    Archived { key: ArchiveKey, attempts: usize },
    // Store failed on every attempt; the staging file was kept.
    Retained { key: ArchiveKey, attempts: usize, error: String },
    // Nothing on disk for this bucket.
    Missing { key: ArchiveKey },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub archived: usize,
    pub retained: Vec<StagingArtifact>,
}

#[derive(Clone)]
pub struct FlushCoordinator {
    store: Arc<dyn ArchiveStore>,
}

impl FlushCoordinator {
    pub fn new(store: Arc<dyn ArchiveStore>) -> Self {
        Self { store }
    }

    /// Archives `artifact` and removes its staging file once stored.
    pub async fn flush(&self, artifact: &StagingArtifact) -> FlushOutcome {
        self.archive(artifact, false).await
    }

    /// A shutdown flush archives the bucket but keeps its staging file: the
    /// bucket is still open, and a restart inside it appends to that file.
    /// The later rollover or recovery overwrites the same key with every row.
    pub async fn flush_job(&self, job: &FlushJob) -> FlushOutcome {
        self.archive(&job.artifact, job.reason == FlushReason::Shutdown).await
    }

    async fn archive(&self, artifact: &StagingArtifact, keep_staging: bool) -> FlushOutcome {
        let key = artifact.archive_key();
        if !artifact.exists().await {
            debug!(key = %key, "no staging file, nothing to archive");
            return FlushOutcome::Missing { key };
        }

        let policy = self.store.retry_policy();
        let store = &self.store;
        let key_ref = &key;
        let mut attempts = 0;
        let stored = policy
            .retry_async(|attempt| {
                attempts = attempt + 1;
                async move {
                    let key = key_ref;
                    let result = store.store(artifact.path(), key).await;
                    if let Err(e) = &result {
                        warn!(key = %key, attempt = attempt + 1, error = %e, "archive attempt failed");
                    }
                    result
                }
            })
            .await;

        match stored {
            Ok(()) if keep_staging => {
                info!(key = %key, attempts, store = %self.store.describe(), "open bucket archived, staging kept");
                FlushOutcome::Archived { key, attempts }
            }
            Ok(()) => {
                // A leftover file here is re-archived to the same key on recovery.
                if let Err(e) = artifact.remove().await {
                    warn!(path = %artifact.path().display(), error = %e, "archived but could not remove staging file");
                }
                info!(key = %key, attempts, store = %self.store.describe(), "bucket archived");
                FlushOutcome::Archived { key, attempts }
            }
            Err(e) => {
                error!(
                    key = %key,
                    attempts,
                    path = %artifact.path().display(),
                    error = %e,
                    "archive failed, staging file retained"
                );
                FlushOutcome::Retained { key, attempts, error: e.to_string() }
            }
        }
    }

    /// Drains `jobs` one at a time until every sender is dropped.
    pub fn spawn(self, book: String, mut jobs: mpsc::Receiver<FlushJob>) -> JoinHandle<FlushReport> {
        tokio::spawn(async move {
            let mut report = FlushReport::default();
            while let Some(job) = jobs.recv().await {
                debug!(book = %book, reason = ?job.reason, start = %job.artifact.start(), "flushing");
                match self.flush_job(&job).await {
                    FlushOutcome::Archived { .. } => {
                        report.archived += 1;
                        metrics::counter!("archiver_flushes_total", "book" => book.clone()).increment(1);
                    }
                    FlushOutcome::Retained { .. } => {
                        report.retained.push(job.artifact);
                        metrics::counter!("archiver_flush_failures_total", "book" => book.clone()).increment(1);
                    }
                    FlushOutcome::Missing { .. } => {}
                }
            }
            report
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::Sample;
    use crate::persist::retry::RetryPolicy;
    use crate::persist::{PersistError, PersistResult};
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::path::Path;

    // Fails the first `failures` calls, then records stored contents by key.
    struct FlakyStore {
        failures: Mutex<usize>,
        calls: Mutex<usize>,
        stored: Mutex<HashMap<String, String>>,
        staging_seen_on_failure: Mutex<Vec<bool>>,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(0),
                stored: Mutex::new(HashMap::new()),
                staging_seen_on_failure: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ArchiveStore for FlakyStore {
        async fn store(&self, path: &Path, key: &ArchiveKey) -> PersistResult<()> {
            *self.calls.lock() += 1;
            {
                let mut failures = self.failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    self.staging_seen_on_failure.lock().push(path.exists());
                    return Err(PersistError::Status { key: key.to_string(), status: 503 });
                }
            }
            let body = std::fs::read_to_string(path)?;
            self.stored.lock().insert(key.to_string(), body);
            Ok(())
        }

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::new(3, 10, 10, 0.0)
        }

        fn describe(&self) -> String {
            "flaky".into()
        }
    }

    async fn staged(dir: &Path) -> StagingArtifact {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let artifact = StagingArtifact::new(dir, "btc_mxn", start);
        artifact
            .append(&Sample::from_top_of_book(start, "btc_mxn", 1.0, 2.0))
            .await
            .unwrap();
        artifact
    }

    #[tokio::test(start_paused = true)]
    async fn two_failures_then_success_archives_once() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = staged(dir.path()).await;
        let store = Arc::new(FlakyStore::new(2));
        let coordinator = FlushCoordinator::new(store.clone());

        let outcome = coordinator.flush(&artifact).await;
        assert_eq!(outcome, FlushOutcome::Archived { key: artifact.archive_key(), attempts: 3 });
        assert_eq!(*store.calls.lock(), 3);
        assert_eq!(*store.staging_seen_on_failure.lock(), vec![true, true]);
        assert_eq!(store.stored.lock().len(), 1);
        assert!(!artifact.exists().await);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_keep_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = staged(dir.path()).await;
        let store = Arc::new(FlakyStore::new(10));
        let coordinator = FlushCoordinator::new(store.clone());

        match coordinator.flush(&artifact).await {
            FlushOutcome::Retained { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected {other:?}"),
        }
        assert!(artifact.exists().await);
        assert!(store.stored.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reflushing_lands_on_the_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore::new(0));
        let coordinator = FlushCoordinator::new(store.clone());

        let first = staged(dir.path()).await;
        coordinator.flush(&first).await;
        // Same bucket staged again, as after a crash between upload and delete.
        let second = staged(dir.path()).await;
        coordinator.flush(&second).await;

        assert_eq!(*store.calls.lock(), 2);
        assert_eq!(store.stored.lock().len(), 1);
    }

    #[tokio::test]
    async fn missing_staging_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FlakyStore::new(0));
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let artifact = StagingArtifact::new(dir.path(), "btc_mxn", start);
        let outcome = FlushCoordinator::new(store.clone()).flush(&artifact).await;
        assert!(matches!(outcome, FlushOutcome::Missing { .. }));
        assert_eq!(*store.calls.lock(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flush_keeps_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = staged(dir.path()).await;
        let store = Arc::new(FlakyStore::new(0));
        let coordinator = FlushCoordinator::new(store.clone());

        let job = FlushJob { artifact: artifact.clone(), reason: FlushReason::Shutdown };
        let outcome = coordinator.flush_job(&job).await;
        assert_eq!(outcome, FlushOutcome::Archived { key: artifact.archive_key(), attempts: 1 });
        assert!(artifact.exists().await);

        // Restart inside the same bucket keeps appending, then rollover re-archives everything.
        let start = artifact.start();
        artifact.append(&Sample::from_top_of_book(start, "btc_mxn", 3.0, 4.0)).await.unwrap();
        let job = FlushJob { artifact: artifact.clone(), reason: FlushReason::Rollover };
        coordinator.flush_job(&job).await;

        assert!(!artifact.exists().await);
        let stored = store.stored.lock();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[artifact.archive_key().as_str()].lines().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_coordinator_reports_retained_files() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = staged(dir.path()).await;
        let (tx, rx) = mpsc::channel(4);
        let handle = FlushCoordinator::new(Arc::new(FlakyStore::new(10))).spawn("btc_mxn".into(), rx);
        tx.send(FlushJob { artifact: artifact.clone(), reason: FlushReason::Rollover }).await.unwrap();
        drop(tx);

        let report = handle.await.unwrap();
        assert_eq!(report.archived, 0);
        assert_eq!(report.retained, vec![artifact]);
    }
}
