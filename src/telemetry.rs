use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over `default_filter` when set.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing subscriber: {e}"))
}

#[cfg(feature = "metrics-exporter")]
pub fn init_metrics(listen: SocketAddr) -> anyhow::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new().with_http_listener(listen).install()?;

    metrics::describe_counter!("archiver_samples_total", "samples appended to a staging file");
    metrics::describe_counter!("archiver_no_data_total", "polls that returned an empty side or payload");
    metrics::describe_counter!("archiver_fetch_errors_total", "polls that failed in transport or decode");
    metrics::describe_counter!("archiver_flushes_total", "buckets archived and removed from staging");
    metrics::describe_counter!("archiver_flush_failures_total", "buckets retained after exhausting retries");
    metrics::gauge!("archiver_up").set(1.0);
    tracing::info!(%listen, "prometheus exporter listening");
    Ok(())
}

#[cfg(not(feature = "metrics-exporter"))]
pub fn init_metrics(_listen: SocketAddr) -> anyhow::Result<()> {
    Ok(())
}
