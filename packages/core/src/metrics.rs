//! Prometheus metrics registry for the child publisher monitor.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and pass it to
//! the snapshot service and the HTTP middleware.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Fetches run against Ad Manager (success + failure).
    pub fetches_total: Counter,
    /// Fetches that ended in an error.
    pub fetch_errors_total: Counter,
    /// Requests answered from a fresh snapshot file.
    pub cache_hits_total: Counter,
    /// Requests that needed a new fetch (no snapshot, stale, or forced).
    pub cache_misses_total: Counter,
    /// Record count of the most recent successful fetch.
    pub records_last_fetch: Gauge,
    /// HTTP request count, labelled by method, path, and status code.
    pub http_requests_total: CounterVec,
    /// HTTP request latency histogram in seconds.
    pub http_request_duration: Histogram,
    /// The registry that owns all of the above metrics.
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Returns an error if any metric
    /// name is invalid or duplicated.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let fetches_total = Counter::with_opts(Opts::new(
            "childpub_monitor_fetches_total",
            "Total Ad Manager fetches",
        ))?;

        let fetch_errors_total = Counter::with_opts(Opts::new(
            "childpub_monitor_fetch_errors_total",
            "Failed Ad Manager fetches",
        ))?;

        let cache_hits_total = Counter::with_opts(Opts::new(
            "childpub_monitor_cache_hits_total",
            "Requests served from a fresh snapshot",
        ))?;

        let cache_misses_total = Counter::with_opts(Opts::new(
            "childpub_monitor_cache_misses_total",
            "Requests that triggered a fetch",
        ))?;

        let records_last_fetch = Gauge::with_opts(Opts::new(
            "childpub_monitor_records_last_fetch",
            "Records returned by the most recent fetch",
        ))?;

        let http_requests_total = CounterVec::new(
            Opts::new(
                "childpub_monitor_http_requests_total",
                "HTTP requests by method, path, and status",
            ),
            &["method", "path", "status"],
        )?;

        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "childpub_monitor_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
        )?;

        registry.register(Box::new(fetches_total.clone()))?;
        registry.register(Box::new(fetch_errors_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(records_last_fetch.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            fetches_total,
            fetch_errors_total,
            cache_hits_total,
            cache_misses_total,
            records_last_fetch,
            http_requests_total,
            http_request_duration,
            registry,
        })
    }

    /// Render all metrics as Prometheus text format (for the `/metrics` endpoint).
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}

/// `GET /metrics`
pub async fn metrics_handler(State(metrics): State<Arc<AppMetrics>>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(err) => {
            tracing::error!("Failed to render metrics: {}", err);
            (StatusCode::INTERNAL_SERVER_ERROR, Body::from("metrics error")).into_response()
        }
    }
}

/// Middleware recording request counts and latency.
pub async fn track_http(
    State(metrics): State<Arc<AppMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    // Label by route template so unmatched paths do not explode cardinality.
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let started = Instant::now();
    let response = next.run(request).await;

    metrics
        .http_request_duration
        .observe(started.elapsed().as_secs_f64());
    metrics
        .http_requests_total
        .with_label_values(&[method.as_str(), path.as_str(), response.status().as_str()])
        .inc();

    response
}
