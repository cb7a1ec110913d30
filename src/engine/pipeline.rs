// Per-book wiring: poller -> buffer -> flush coordinator, each its own task.
// Books share only the snapshot source and the archive store.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::info;

use crate::engine::buffer::{run_buffer, BufferOptions, IntervalBuffer};
use crate::engine::flush::{FlushCoordinator, FlushReport};
use crate::engine::interval::BucketWidth;
use crate::engine::poller::{Poller, PollerStats};
use crate::market_data::adapters::SnapshotSource;
use crate::persist::ArchiveStore;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub width: BucketWidth,
    pub staging_dir: PathBuf,
    pub channel_capacity: usize,
    pub buffer: BufferOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSummary {
    pub book: String,
    pub poller: PollerStats,
    pub flush: FlushReport,
}

pub struct BookPipeline {
    book: String,
    poller: JoinHandle<PollerStats>,
    buffer: JoinHandle<()>,
    flusher: JoinHandle<FlushReport>,
}

impl BookPipeline {
    pub fn spawn(
        book: &str,
        source: Arc<dyn SnapshotSource>,
        store: Arc<dyn ArchiveStore>,
        options: &PipelineOptions,
        shutdown: watch::Receiver<bool>,
        now: DateTime<Utc>,
    ) -> Self {
        let capacity = options.channel_capacity.max(1);
        let (sample_tx, sample_rx) = mpsc::channel(capacity);
        let (flush_tx, flush_rx) = mpsc::channel(capacity);

        let buffer = IntervalBuffer::open(book, options.width, &options.staging_dir, now);
        info!(book, start = %buffer.window().start, end = %buffer.window().end, "opened bucket");

        let flusher = FlushCoordinator::new(store).spawn(book.to_string(), flush_rx);
        let buffer = tokio::spawn(run_buffer(buffer, sample_rx, flush_tx, options.buffer));
        let poller = tokio::spawn(Poller::new(book, source, sample_tx, shutdown).run());

        Self { book: book.to_string(), poller, buffer, flusher }
    }

    /// Waits for the poller, then the buffer drain, then the remaining flushes.
    pub async fn join(self) -> Result<BookSummary, JoinError> {
        let poller = self.poller.await?;
        self.buffer.await?;
        let flush = self.flusher.await?;
        Ok(BookSummary { book: self.book, poller, flush })
    }
}

pub fn spawn_all(
    books: &[String],
    source: Arc<dyn SnapshotSource>,
    store: Arc<dyn ArchiveStore>,
    options: &PipelineOptions,
    shutdown: watch::Receiver<bool>,
) -> Vec<BookPipeline> {
    let now = Utc::now();
    books
        .iter()
        .map(|book| BookPipeline::spawn(book, Arc::clone(&source), Arc::clone(&store), options, shutdown.clone(), now))
        .collect()
}

pub async fn join_all_books(pipelines: Vec<BookPipeline>) -> Vec<Result<BookSummary, JoinError>> {
    join_all(pipelines.into_iter().map(BookPipeline::join)).await
}

/// Ctrl-C, or SIGTERM on unix. Handlers are registered by `install`, so a
/// signal arriving before the first `recv` is not lost.
pub struct ShutdownSignal {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
        })
    }

    pub async fn recv(&mut self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            tokio::select! {
                interrupted = tokio::signal::ctrl_c() => interrupted,
                _ = self.terminate.recv() => Ok(()),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await
        }
    }
}
