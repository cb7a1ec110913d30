use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::engine::types::Sample;
use crate::market_data::adapters::{SampleOutcome, SnapshotSource};

/// Time left until the next whole second.
pub fn until_next_second(now: DateTime<Utc>) -> Duration {
    let into_second = u64::from(now.timestamp_subsec_nanos().min(999_999_999));
    Duration::from_nanos(1_000_000_000 - into_second)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollerStats {
    pub ticks: u64,
    pub samples: u64,
    pub no_data: u64,
    pub errors: u64,
}

/// Samples one book once per wall-clock second and feeds its buffer.
pub struct Poller {
    book: String,
    source: Arc<dyn SnapshotSource>,
    samples: mpsc::Sender<Sample>,
    shutdown: watch::Receiver<bool>,
}

impl Poller {
    pub fn new(
        book: &str,
        source: Arc<dyn SnapshotSource>,
        samples: mpsc::Sender<Sample>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self { book: book.to_string(), source, samples, shutdown }
    }

    /// Runs until shutdown is signalled or the buffer goes away. Dropping the
    /// poller on return closes the sample channel.
    pub async fn run(mut self) -> PollerStats {
        let mut stats = PollerStats::default();
        info!(book = %self.book, "poller started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(until_next_second(Utc::now())) => {}
                changed = self.shutdown.changed() => {
                    // sender gone counts as shutdown
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            stats.ticks += 1;
            match self.source.sample(&self.book).await {
                Ok(SampleOutcome::Sample(sample)) => {
                    stats.samples += 1;
                    if self.samples.send(sample).await.is_err() {
                        warn!(book = %self.book, "buffer closed, stopping poller");
                        break;
                    }
                }
                Ok(SampleOutcome::NoData { .. }) => {
                    stats.no_data += 1;
                    metrics::counter!("archiver_no_data_total", "book" => self.book.clone()).increment(1);
                }
                Err(e) => {
                    stats.errors += 1;
                    metrics::counter!("archiver_fetch_errors_total", "book" => self.book.clone()).increment(1);
                    warn!(book = %self.book, error = %e, "fetch failed, skipping tick");
                }
            }
        }

        debug!(book = %self.book, ?stats, "poller stopped");
        stats
    }
}
