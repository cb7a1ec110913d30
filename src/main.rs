use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use book_archiver::engine::pipeline::{join_all_books, spawn_all, ShutdownSignal};
use book_archiver::market_data::adapters::bitso::BitsoAdapter;
use book_archiver::market_data::adapters::SnapshotSource;
use book_archiver::market_data::nonce::NonceCounter;
use book_archiver::market_data::signing::{Credential, RequestSigner};
use book_archiver::persist::local::LocalArchive;
use book_archiver::persist::object::HttpObjectStore;
use book_archiver::persist::ArchiveStore;
use book_archiver::settings::{Overrides, Settings, StorageMode};
use book_archiver::telemetry;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "book-archiver", version, about = "Samples top-of-book every second and archives fixed-width buckets as CSV")]
struct Args {
    /// TOML settings file; skipped when absent.
    #[arg(long, default_value = "book-archiver.toml")]
    config: PathBuf,
    #[arg(long)]
    interval_minutes: Option<u32>,
    /// Repeat for several books; replaces the configured list.
    #[arg(long = "book")]
    books: Vec<String>,
    #[arg(long, value_enum)]
    storage_mode: Option<StorageMode>,
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    staging_dir: Option<PathBuf>,
    /// Also archive the open bucket on Ctrl-C or SIGTERM; its staging file is kept.
    #[arg(long)]
    flush_on_shutdown: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            interval_minutes: self.interval_minutes,
            books: self.books.clone(),
            storage_mode: self.storage_mode,
            base_url: self.base_url.clone(),
            staging_dir: self.staging_dir.clone(),
            flush_on_shutdown: self.flush_on_shutdown.then_some(true),
        }
    }
}

fn build_store(settings: &Settings) -> anyhow::Result<Arc<dyn ArchiveStore>> {
    let storage = &settings.storage;
    let store: Arc<dyn ArchiveStore> = match storage.mode {
        StorageMode::Local => Arc::new(LocalArchive::new(&storage.local_root, settings.retry.clone())),
        StorageMode::Remote => {
            let token = std::env::var(&storage.token_env).ok().filter(|t| !t.trim().is_empty());
            if token.is_none() {
                warn!(var = %storage.token_env, "no storage token set; uploading without authorization");
            }
            Arc::new(
                HttpObjectStore::new(&storage.endpoint, &storage.bucket, token, UPLOAD_TIMEOUT, settings.retry.clone())
                    .context("building object store client")?,
            )
        }
    };
    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let args = Args::parse();
    let settings = Settings::load(Some(&args.config), &args.overrides()).context("loading settings")?;

    telemetry::init_tracing(&settings.log_filter)?;
    telemetry::init_metrics(settings.metrics_addr()?)?;

    let credential = Credential::from_env().context("venue credentials")?;
    let signer = RequestSigner::new(credential, &settings.auth_scheme, Arc::new(NonceCounter::new()));
    let source: Arc<dyn SnapshotSource> =
        Arc::new(BitsoAdapter::new(settings.base_url()?, signer, settings.request_timeout())?);
    let store = build_store(&settings)?;

    tokio::fs::create_dir_all(&settings.staging_dir)
        .await
        .with_context(|| format!("creating staging dir {}", settings.staging_dir.display()))?;

    info!(
        books = ?settings.books,
        interval_minutes = settings.interval_minutes,
        store = %store.describe(),
        staging = %settings.staging_dir.display(),
        "archiver starting"
    );

    let mut signal = ShutdownSignal::install().context("installing signal handlers")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pipelines = spawn_all(&settings.books, source, store, &settings.pipeline_options()?, shutdown_rx);

    signal.recv().await.context("waiting for shutdown signal")?;
    info!("shutdown requested, draining pipelines");
    // Receivers may already be gone if every poller exited on its own.
    let _ = shutdown_tx.send(true);

    let mut retained = 0usize;
    for result in join_all_books(pipelines).await {
        match result {
            Ok(summary) => {
                info!(
                    book = %summary.book,
                    ticks = summary.poller.ticks,
                    samples = summary.poller.samples,
                    no_data = summary.poller.no_data,
                    errors = summary.poller.errors,
                    archived = summary.flush.archived,
                    "book stopped"
                );
                for artifact in &summary.flush.retained {
                    error!(book = %summary.book, path = %artifact.path().display(), key = %artifact.archive_key(), "bucket left in staging");
                }
                retained += summary.flush.retained.len();
            }
            Err(e) => error!(error = %e, "book pipeline task failed"),
        }
    }

    if retained > 0 {
        warn!(retained, "some buckets were not archived; they will be retried on next start");
    }
    Ok(())
}
