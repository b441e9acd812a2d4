//! Run metrics for the ingest and validate flows.
//!
//! Each flow is a short-lived process, so nothing is scraped. When
//! `WAREHOUSE_SYNC_PUSHGATEWAY_URL` is set a Prometheus recorder is installed at
//! startup and the rendered registry is pushed once at the end of the run.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

pub const PUSHGATEWAY_ENV: &str = "WAREHOUSE_SYNC_PUSHGATEWAY_URL";
const JOB_NAME: &str = "warehouse_sync";

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

pub const RUNS_TOTAL: &str = "warehouse_sync_runs_total";
pub const ROWS_READ_TOTAL: &str = "warehouse_sync_rows_read_total";
pub const ROWS_WRITTEN_TOTAL: &str = "warehouse_sync_rows_written_total";
pub const CHUNKS_WRITTEN_TOTAL: &str = "warehouse_sync_chunks_written_total";
pub const COMPARISONS_TOTAL: &str = "warehouse_sync_comparisons_total";
pub const MISMATCHES_TOTAL: &str = "warehouse_sync_mismatches_total";
pub const RUN_DURATION_SECONDS: &str = "warehouse_sync_run_duration_seconds";
pub const LAST_RUN_TIMESTAMP: &str = "warehouse_sync_last_run_timestamp_seconds";

fn pushgateway_url() -> Option<String> {
    std::env::var(PUSHGATEWAY_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Install the recorder if a Pushgateway is configured. Idempotent.
pub fn init_metrics() {
    if pushgateway_url().is_none() {
        debug!("{} not set, metrics disabled", PUSHGATEWAY_ENV);
        return;
    }
    if HANDLE.get().is_some() {
        return;
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = HANDLE.set(handle);
            info!("Prometheus recorder installed");
        }
        Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
    }
}

pub struct IngestMetrics;

impl IngestMetrics {
    pub fn record_rows_read(rows: usize) {
        ::metrics::counter!(ROWS_READ_TOTAL, "flow" => "ingest").increment(rows as u64);
    }

    pub fn record_load(rows_written: usize, chunks: usize) {
        ::metrics::counter!(ROWS_WRITTEN_TOTAL).increment(rows_written as u64);
        ::metrics::counter!(CHUNKS_WRITTEN_TOTAL).increment(chunks as u64);
    }
}

pub struct ValidateMetrics;

impl ValidateMetrics {
    pub fn record_rows_read(source_rows: usize, warehouse_rows: usize) {
        ::metrics::counter!(ROWS_READ_TOTAL, "flow" => "validate", "store" => "source")
            .increment(source_rows as u64);
        ::metrics::counter!(ROWS_READ_TOTAL, "flow" => "validate", "store" => "warehouse")
            .increment(warehouse_rows as u64);
    }

    pub fn record_comparison(comparisons: usize, mismatches: usize) {
        ::metrics::counter!(COMPARISONS_TOTAL).increment(comparisons as u64);
        ::metrics::counter!(MISMATCHES_TOTAL).increment(mismatches as u64);
    }
}

/// Final status of a run; `status` is "success", "mismatch" or an error kind.
pub fn record_run(flow: &'static str, status: &'static str, duration_secs: f64) {
    ::metrics::counter!(RUNS_TOTAL, "flow" => flow, "status" => status).increment(1);
    ::metrics::histogram!(RUN_DURATION_SECONDS, "flow" => flow).record(duration_secs);
    ::metrics::gauge!(LAST_RUN_TIMESTAMP, "flow" => flow)
        .set(chrono::Utc::now().timestamp() as f64);
}

fn push_url(base: &str, instance: &str) -> String {
    format!(
        "{}/metrics/job/{}/instance/{}",
        base.trim_end_matches('/'),
        JOB_NAME,
        instance
    )
}

/// Push the rendered registry to the Pushgateway. No-op when metrics are disabled.
pub async fn push_run_metrics(instance: &str) -> anyhow::Result<()> {
    let (Some(base), Some(handle)) = (pushgateway_url(), HANDLE.get()) else {
        return Ok(());
    };
    let body = handle.render();
    let url = push_url(&base, instance);

    let response = reqwest::Client::new()
        .post(&url)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("Pushgateway returned status {}: {}", status, text);
    }
    info!("Pushed metrics to Pushgateway for instance={}", instance);
    Ok(())
}
