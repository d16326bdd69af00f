// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics of the controller.
//!
//! Every metric is namespaced `haproxy_ingress_`. [`router`] serves them on `/metrics`
//! next to a `/healthz` probe and a small `/debug/pprof` index; the prometheus handler
//! routes the proxy's own `/metrics` path to it.
//!
//! # Metrics Categories
//!
//! - **Reconcile Metrics** - outcome and duration of each reconcile
//! - **Proxy Metrics** - reloads, restarts and failed transactions
//! - **Event Metrics** - cluster notifications merged into the store
//! - **Error Metrics** - errors reported by the pipeline, by kind

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    CounterVec, Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix of every metric
const METRICS_NAMESPACE: &str = "haproxy_ingress";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconcile Metrics
// ============================================================================

/// Total number of reconciles by outcome
///
/// Labels:
/// - `status`: `success` or `error`
pub static RECONCILE_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciles_total"),
        "Total number of reconciles by outcome",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciles in seconds
pub static RECONCILE_DURATION_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconcile_duration_seconds"),
        "Duration of reconciles in seconds",
    )
    .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]);
    let histogram = Histogram::with_opts(opts).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// Proxy Metrics
// ============================================================================

/// Total number of requests sent to the proxy process
///
/// Labels:
/// - `action`: `start`, `reload` or `restart`
/// - `status`: `success` or `error`
pub static PROXY_ACTIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_proxy_actions_total"),
        "Total number of start, reload and restart requests by outcome",
    );
    let counter = CounterVec::new(opts, &["action", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of proxy transactions that failed to commit
pub static TRANSACTION_FAILURES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        format!("{METRICS_NAMESPACE}_transaction_failures_total"),
        "Total number of proxy transactions that failed to commit",
    )
    .unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Event Metrics
// ============================================================================

/// Total number of cluster notifications
///
/// Labels:
/// - `kind`: resource kind (`Ingress`, `Service`, ...)
/// - `changed`: `true` when the notification changed the store
pub static EVENTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_events_total"),
        "Total number of cluster notifications by kind and effect",
    );
    let counter = CounterVec::new(opts, &["kind", "changed"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Error Metrics
// ============================================================================

/// Total number of errors reported by the pipeline
///
/// Labels:
/// - `kind`: `not_found`, `validation`, `proxy`, `io`, `cert`, `process`, `fatal`
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_errors_total"),
        "Total number of errors reported by the reconcile pipeline by kind",
    );
    let counter = CounterVec::new(opts, &["kind"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a reconcile that committed its transaction.
pub fn record_reconcile_success(duration: Duration) {
    RECONCILE_TOTAL.with_label_values(&["success"]).inc();
    RECONCILE_DURATION_SECONDS.observe(duration.as_secs_f64());
}

/// Record a reconcile whose transaction was rolled back.
pub fn record_reconcile_error(duration: Duration) {
    RECONCILE_TOTAL.with_label_values(&["error"]).inc();
    RECONCILE_DURATION_SECONDS.observe(duration.as_secs_f64());
    TRANSACTION_FAILURES_TOTAL.inc();
}

/// Record a request to the proxy process.
///
/// # Arguments
/// * `action` - `start`, `reload` or `restart`
/// * `success` - whether the supervisor carried it out
pub fn record_proxy_action(action: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    PROXY_ACTIONS_TOTAL.with_label_values(&[action, status]).inc();
}

/// Record a cluster notification.
pub fn record_event(kind: &str, changed: bool) {
    EVENTS_TOTAL
        .with_label_values(&[kind, if changed { "true" } else { "false" }])
        .inc();
}

/// Record a pipeline error.
pub fn record_error(kind: &str) {
    ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
///
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

// ============================================================================
// HTTP endpoints
// ============================================================================

/// Routes of the controller HTTP server.
pub fn router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/debug/pprof", get(pprof_handler))
        .route("/debug/pprof/", get(pprof_handler))
}

async fn metrics_handler() -> impl IntoResponse {
    match gather_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn healthz_handler() -> &'static str {
    "ok"
}

/// Process summary; the runtime has no sampling profiler to expose.
async fn pprof_handler() -> String {
    let threads = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    format!(
        "{} {}\navailable_parallelism {threads}\npid {}\n",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        std::process::id()
    )
}
