// Per-book open bucket; a closed bucket is never written again

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::flush::{FlushJob, FlushReason};
use crate::engine::interval::{BucketWidth, BucketWindow};
use crate::engine::types::Sample;
use crate::persist::staging::StagingArtifact;
use crate::persist::PersistResult;

/// A bucket that stopped accepting samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedBucket {
    pub window: BucketWindow,
    pub artifact: StagingArtifact,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Appended { window: BucketWindow },
    Rolled { closed: ClosedBucket, opened: BucketWindow },
    // Captured before the open bucket started (wall clock stepped back); dropped.
    Stale { captured_at: DateTime<Utc>, open: BucketWindow },
}

#[derive(Debug)]
struct OpenBucket {
    window: BucketWindow,
    artifact: StagingArtifact,
    rows: usize,
}

#[derive(Debug)]
pub struct IntervalBuffer {
    book: String,
    width: BucketWidth,
    staging_dir: PathBuf,
    open: OpenBucket,
}

impl IntervalBuffer {
    /// Opens the bucket containing `now`. An existing staging file for that
    /// bucket (restart inside the same interval) is appended to, not replaced.
    pub fn open(book: &str, width: BucketWidth, staging_dir: &Path, now: DateTime<Utc>) -> Self {
        let window = BucketWindow::containing(now, width);
        Self {
            book: book.to_string(),
            width,
            staging_dir: staging_dir.to_path_buf(),
            open: OpenBucket {
                window,
                artifact: StagingArtifact::new(staging_dir, book, window.start),
                rows: 0,
            },
        }
    }

    pub fn book(&self) -> &str {
        &self.book
    }

    pub fn window(&self) -> BucketWindow {
        self.open.window
    }

    pub fn artifact(&self) -> &StagingArtifact {
        &self.open.artifact
    }

    /// Rows appended to the open bucket by this process.
    pub fn rows(&self) -> usize {
        self.open.rows
    }

    pub async fn push(&mut self, sample: &Sample) -> PersistResult<Transition> {
        let at = sample.captured_at;
        if at < self.open.window.start {
            return Ok(Transition::Stale { captured_at: at, open: self.open.window });
        }
        if self.open.window.contains(at) {
            self.open.artifact.append(sample).await?;
            self.open.rows += 1;
            return Ok(Transition::Appended { window: self.open.window });
        }

        // Rollover. Persist the sample in its own bucket first; if that fails the
        // old bucket stays open and the next sample retries the rollover.
        let window = BucketWindow::containing(at, self.width);
        let artifact = StagingArtifact::new(&self.staging_dir, &self.book, window.start);
        artifact.append(sample).await?;

        let previous = std::mem::replace(&mut self.open, OpenBucket { window, artifact, rows: 1 });
        Ok(Transition::Rolled {
            closed: ClosedBucket { window: previous.window, artifact: previous.artifact, rows: previous.rows },
            opened: window,
        })
    }

    /// Staging files for this book from buckets before the open one.
    pub async fn orphans(&self) -> PersistResult<Vec<StagingArtifact>> {
        let open_start = self.open.window.start;
        let found = StagingArtifact::scan(&self.staging_dir, &self.book).await?;
        Ok(found.into_iter().filter(|a| a.start() < open_start).collect())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BufferOptions {
    pub recover_staging: bool,
    pub flush_on_shutdown: bool,
}

/// Buffer task body: consumes samples until the poller hangs up, forwarding
/// closed buckets to the coordinator.
pub async fn run_buffer(
    mut buffer: IntervalBuffer,
    mut samples: mpsc::Receiver<Sample>,
    flushes: mpsc::Sender<FlushJob>,
    options: BufferOptions,
) {
    let book = buffer.book().to_string();

    if options.recover_staging {
        match buffer.orphans().await {
            Ok(orphans) => {
                for artifact in orphans {
                    info!(book = %book, start = %artifact.start(), "recovering staging file");
                    if flushes.send(FlushJob { artifact, reason: FlushReason::Recovery }).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => warn!(book = %book, error = %e, "could not scan staging dir"),
        }
    }

    while let Some(sample) = samples.recv().await {
        match buffer.push(&sample).await {
            Ok(Transition::Appended { .. }) => {
                metrics::counter!("archiver_samples_total", "book" => book.clone()).increment(1);
            }
            Ok(Transition::Rolled { closed, opened }) => {
                metrics::counter!("archiver_samples_total", "book" => book.clone()).increment(1);
                info!(
                    book = %book,
                    closed = %closed.window.start,
                    rows = closed.rows,
                    opened = %opened.start,
                    "bucket rolled over"
                );
                let job = FlushJob { artifact: closed.artifact, reason: FlushReason::Rollover };
                if flushes.send(job).await.is_err() {
                    error!(book = %book, "flush coordinator is gone");
                    return;
                }
            }
            Ok(Transition::Stale { captured_at, open }) => {
                warn!(book = %book, %captured_at, open = %open.start, "sample older than open bucket, dropped");
            }
            Err(e) => {
                error!(book = %book, error = %e, "failed to stage sample");
            }
        }
    }

    if options.flush_on_shutdown {
        debug!(book = %book, start = %buffer.window().start, "flushing open bucket on shutdown");
        let job = FlushJob { artifact: buffer.artifact().clone(), reason: FlushReason::Shutdown };
        let _ = flushes.send(job).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    fn sample(ts: DateTime<Utc>) -> Sample {
        Sample::from_top_of_book(ts, "btc_mxn", 100.0, 101.0)
    }

    fn two_minutes() -> BucketWidth {
        BucketWidth::from_minutes(2).unwrap()
    }

    #[tokio::test]
    async fn appends_inside_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut buf = IntervalBuffer::open("btc_mxn", two_minutes(), dir.path(), at(10, 0, 1));
        for s in [5, 45] {
            let t = buf.push(&sample(at(10, 0, s))).await.unwrap();
            assert!(matches!(t, Transition::Appended { .. }));
        }
        assert_eq!(buf.rows(), 2);
        assert_eq!(buf.artifact().read_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rollover_sample_goes_to_new_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let mut buf = IntervalBuffer::open("btc_mxn", two_minutes(), dir.path(), at(10, 0, 0));
        for (m, s) in [(0, 5), (0, 45), (1, 50)] {
            buf.push(&sample(at(10, m, s))).await.unwrap();
        }

        let t = buf.push(&sample(at(10, 2, 10))).await.unwrap();
        let Transition::Rolled { closed, opened } = t else { panic!("expected rollover, got {t:?}") };
        assert_eq!(closed.window.start, at(10, 0, 0));
        assert_eq!(closed.rows, 3);
        assert_eq!(closed.artifact.read_all().await.unwrap().len(), 3);
        assert_eq!(opened.start, at(10, 2, 0));
        assert_eq!(opened.end, at(10, 4, 0));

        let open_rows = buf.artifact().read_all().await.unwrap();
        assert_eq!(open_rows, vec![sample(at(10, 2, 10))]);
    }

    #[tokio::test]
    async fn skips_empty_buckets_after_a_gap() {
        let dir = tempfile::tempdir().unwrap();
        let mut buf = IntervalBuffer::open("btc_mxn", two_minutes(), dir.path(), at(10, 0, 0));
        buf.push(&sample(at(10, 0, 5))).await.unwrap();
        let t = buf.push(&sample(at(10, 9, 0))).await.unwrap();
        let Transition::Rolled { opened, .. } = t else { panic!("expected rollover") };
        assert_eq!(opened.start, at(10, 8, 0));
    }

    #[tokio::test]
    async fn stale_sample_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut buf = IntervalBuffer::open("btc_mxn", two_minutes(), dir.path(), at(10, 2, 0));
        let t = buf.push(&sample(at(10, 1, 59))).await.unwrap();
        assert!(matches!(t, Transition::Stale { .. }));
        assert!(!buf.artifact().exists().await);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn restart_in_same_bucket_keeps_appending() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = IntervalBuffer::open("btc_mxn", two_minutes(), dir.path(), at(10, 0, 0));
        first.push(&sample(at(10, 0, 5))).await.unwrap();
        drop(first);

        let mut second = IntervalBuffer::open("btc_mxn", two_minutes(), dir.path(), at(10, 1, 0));
        second.push(&sample(at(10, 1, 5))).await.unwrap();
        assert_eq!(second.artifact().read_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn orphans_exclude_open_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let mut old = IntervalBuffer::open("btc_mxn", two_minutes(), dir.path(), at(9, 0, 0));
        old.push(&sample(at(9, 0, 5))).await.unwrap();

        let mut buf = IntervalBuffer::open("btc_mxn", two_minutes(), dir.path(), at(10, 0, 0));
        buf.push(&sample(at(10, 0, 5))).await.unwrap();
        let orphans = buf.orphans().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].start(), at(9, 0, 0));
    }

    #[tokio::test]
    async fn task_forwards_recovery_then_rollover_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut old = IntervalBuffer::open("btc_mxn", two_minutes(), dir.path(), at(9, 0, 0));
        old.push(&sample(at(9, 0, 5))).await.unwrap();

        let buf = IntervalBuffer::open("btc_mxn", two_minutes(), dir.path(), at(10, 0, 0));
        let (sample_tx, sample_rx) = mpsc::channel(8);
        let (flush_tx, mut flush_rx) = mpsc::channel(8);
        let options = BufferOptions { recover_staging: true, flush_on_shutdown: true };
        let task = tokio::spawn(run_buffer(buf, sample_rx, flush_tx, options));

        sample_tx.send(sample(at(10, 0, 5))).await.unwrap();
        sample_tx.send(sample(at(10, 2, 10))).await.unwrap();
        drop(sample_tx);
        task.await.unwrap();

        let mut jobs = Vec::new();
        while let Some(job) = flush_rx.recv().await {
            jobs.push((job.reason, job.artifact.start()));
        }
        assert_eq!(
            jobs,
            vec![
                (FlushReason::Recovery, at(9, 0, 0)),
                (FlushReason::Rollover, at(10, 0, 0)),
                (FlushReason::Shutdown, at(10, 2, 0)),
            ]
        );
    }
}
