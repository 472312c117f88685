//! Prometheus metrics for the tessera server.
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it.
//! Metrics carry no owner names, filenames or session ids, only aggregate
//! counts. Restrict the endpoint at the network layer in production.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload session metrics
pub static UPLOAD_SESSIONS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_upload_sessions_created_total",
        "Total number of upload sessions created",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_ABORTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_upload_sessions_aborted_total",
        "Total number of upload sessions aborted by their owner",
    )
    .expect("metric creation failed")
});

// Chunk metrics
pub static CHUNKS_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_chunks_received_total",
        "Total number of chunk writes accepted (re-deliveries included)",
    )
    .expect("metric creation failed")
});

pub static BYTES_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("tessera_bytes_received_total", "Total chunk bytes received")
        .expect("metric creation failed")
});

pub static CHUNK_UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "tessera_chunk_upload_duration_seconds",
            "Time to write one chunk and recount the session",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
    )
    .expect("metric creation failed")
});

// Merge metrics
pub static MERGES_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_merges_completed_total",
        "Total number of sessions merged into artifacts",
    )
    .expect("metric creation failed")
});

pub static MERGES_FAILED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("tessera_merges_failed_total", "Failed merges by reason"),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static MERGE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "tessera_merge_duration_seconds",
            "Time to concatenate chunks and register the artifact",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .expect("metric creation failed")
});

pub static ARTIFACT_BYTES_WRITTEN: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_artifact_bytes_written_total",
        "Total bytes written to finished artifacts",
    )
    .expect("metric creation failed")
});

// Reaper metrics
pub static REAPER_SWEEPS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("tessera_reaper_sweeps_total", "Total reaper sweeps run")
        .expect("metric creation failed")
});

pub static REAPER_DIRS_REAPED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_reaper_dirs_reaped_total",
        "Total expired session directories removed",
    )
    .expect("metric creation failed")
});

pub static REAPER_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tessera_reaper_failures_total",
        "Total expired session directories that could not be removed",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests may build several routers in one process.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn Collector>> = vec![
            Box::new(UPLOAD_SESSIONS_CREATED.clone()),
            Box::new(UPLOAD_SESSIONS_ABORTED.clone()),
            Box::new(CHUNKS_RECEIVED.clone()),
            Box::new(BYTES_RECEIVED.clone()),
            Box::new(CHUNK_UPLOAD_DURATION.clone()),
            Box::new(MERGES_COMPLETED.clone()),
            Box::new(MERGES_FAILED.clone()),
            Box::new(MERGE_DURATION.clone()),
            Box::new(ARTIFACT_BYTES_WRITTEN.clone()),
            Box::new(REAPER_SWEEPS.clone()),
            Box::new(REAPER_DIRS_REAPED.clone()),
            Box::new(REAPER_FAILURES.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record a failed merge by reason.
pub fn record_merge_failure(reason: &str) {
    MERGES_FAILED.with_label_values(&[reason]).inc();
}
