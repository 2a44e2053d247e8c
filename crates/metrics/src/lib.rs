//! Metrics and tracing setup for the pstore router.
//!
//! The router never touches a global registry. It is handed an
//! `Arc<dyn MetricsRecorder>` at construction; [`RouterMetrics`] is the
//! prometheus-backed implementation the binary injects, and the same
//! instance is served over HTTP by [`serve_metrics`].

use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use pstore_common::{Code, DriftKind, Operation, ShadowWriteOutcome};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

// ────────────────────────── Tracing ──────────────────────────

/// Initialize the tracing subscriber with env-filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

// ────────────────────────── Recorder capability ──────────────────────────

/// Sink for everything the router measures.
///
/// Implementations must tolerate concurrent calls from any number of
/// in-flight requests and verification tasks.
pub trait MetricsRecorder: Send + Sync + 'static {
    /// One backend call finished (primary, secondary or shadow write).
    fn record_call(&self, op: Operation, backend: &str, code: Code, elapsed: Duration);

    /// A secondary disagreed with the primary.
    fn record_drift(&self, kind: DriftKind);

    /// The split weight in effect for a routing decision.
    fn record_split(&self, weight: f64);

    /// One write-queue element was consumed.
    fn record_shadow_write(&self, backend: &str, outcome: ShadowWriteOutcome);

    /// Current write-queue backlog.
    fn record_queue_depth(&self, depth: usize);
}

// ────────────────────────── Prometheus metrics ──────────────────────────

/// All Prometheus metrics for a pstore router.
pub struct RouterMetrics {
    registry: Registry,

    backend_calls: IntCounterVec,
    backend_latency_secs: HistogramVec,
    drift: IntCounterVec,
    split_weight: Gauge,
    shadow_writes: IntCounterVec,
    queue_depth: IntGauge,
}

// Manual Debug impl because prometheus types don't derive Debug.
impl std::fmt::Debug for RouterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterMetrics").finish_non_exhaustive()
    }
}

/// Histogram buckets (seconds). Key listings on large stores run long,
/// hence the tail.
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 50.0,
];

impl RouterMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let backend_calls = IntCounterVec::new(
            Opts::new(
                "pstore_backend_calls_total",
                "Backend calls, by operation, backend and status code",
            ),
            &["op", "backend", "code"],
        )
        .expect("backend_calls counter vec");

        let backend_latency_secs = HistogramVec::new(
            HistogramOpts::new(
                "pstore_backend_latency_seconds",
                "Latency of successful backend calls in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["op", "backend"],
        )
        .expect("backend_latency_secs histogram");

        let drift = IntCounterVec::new(
            Opts::new(
                "pstore_drift_total",
                "Secondary results that disagreed with the primary",
            ),
            &["kind"],
        )
        .expect("drift counter vec");

        let split_weight = Gauge::with_opts(Opts::new(
            "pstore_split_weight",
            "Split weight used for the latest routing decision",
        ))
        .expect("split_weight gauge");

        let shadow_writes = IntCounterVec::new(
            Opts::new(
                "pstore_shadow_writes_total",
                "Write-queue elements consumed, by target and outcome",
            ),
            &["backend", "outcome"],
        )
        .expect("shadow_writes counter vec");

        let queue_depth = IntGauge::with_opts(Opts::new(
            "pstore_write_queue_depth",
            "Elements waiting in the shadow write queue",
        ))
        .expect("queue_depth gauge");

        registry
            .register(Box::new(backend_calls.clone()))
            .expect("register backend_calls");
        registry
            .register(Box::new(backend_latency_secs.clone()))
            .expect("register backend_latency_secs");
        registry
            .register(Box::new(drift.clone()))
            .expect("register drift");
        registry
            .register(Box::new(split_weight.clone()))
            .expect("register split_weight");
        registry
            .register(Box::new(shadow_writes.clone()))
            .expect("register shadow_writes");
        registry
            .register(Box::new(queue_depth.clone()))
            .expect("register queue_depth");

        // Materialize every drift series so dashboards see zeros.
        for kind in DriftKind::ALL {
            drift.with_label_values(&[kind.as_str()]);
        }

        Self {
            registry,
            backend_calls,
            backend_latency_secs,
            drift,
            split_weight,
            shadow_writes,
            queue_depth,
        }
    }

    /// Current value of one drift counter.
    pub fn drift(&self, kind: DriftKind) -> u64 {
        self.drift.with_label_values(&[kind.as_str()]).get()
    }

    /// Sum over all drift counters.
    pub fn total_drift(&self) -> u64 {
        DriftKind::ALL.iter().map(|k| self.drift(*k)).sum()
    }

    /// Number of calls recorded for one (op, backend, code) triple.
    pub fn calls(&self, op: Operation, backend: &str, code: Code) -> u64 {
        self.backend_calls
            .with_label_values(&[op.as_str(), backend, code.as_str()])
            .get()
    }

    pub fn shadow_writes(&self, backend: &str, outcome: ShadowWriteOutcome) -> u64 {
        self.shadow_writes
            .with_label_values(&[backend, outcome.as_str()])
            .get()
    }

    pub fn queue_depth(&self) -> i64 {
        self.queue_depth.get()
    }

    pub fn split_weight(&self) -> f64 {
        self.split_weight.get()
    }

    /// Encode all registered metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            tracing::warn!("prometheus text encoding failed: {}", e);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Default for RouterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRecorder for RouterMetrics {
    fn record_call(&self, op: Operation, backend: &str, code: Code, elapsed: Duration) {
        self.backend_calls
            .with_label_values(&[op.as_str(), backend, code.as_str()])
            .inc();
        if code == Code::Ok {
            self.backend_latency_secs
                .with_label_values(&[op.as_str(), backend])
                .observe(elapsed.as_secs_f64());
        }
    }

    fn record_drift(&self, kind: DriftKind) {
        self.drift.with_label_values(&[kind.as_str()]).inc();
    }

    fn record_split(&self, weight: f64) {
        self.split_weight.set(weight);
    }

    fn record_shadow_write(&self, backend: &str, outcome: ShadowWriteOutcome) {
        self.shadow_writes
            .with_label_values(&[backend, outcome.as_str()])
            .inc();
    }

    fn record_queue_depth(&self, depth: usize) {
        self.queue_depth
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }
}

// ────────────────────────── Metrics HTTP server ──────────────────────────

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

fn metrics_response(metrics: &RouterMetrics) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(metrics.encode())));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
    );
    response
}

/// Serve Prometheus metrics on the given address (`GET /metrics`).
///
/// This spawns a lightweight HTTP/1.1 server. Call from a `tokio::spawn`.
pub async fn serve_metrics(
    addr: SocketAddr,
    metrics: Arc<RouterMetrics>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let service = service_fn(move |_req: Request<hyper::body::Incoming>| {
                let metrics = metrics.clone();
                async move { Ok::<_, std::convert::Infallible>(metrics_response(&metrics)) }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!("metrics connection error: {}", e);
            }
        });
    }
}

// ────────────────────────── Tests ──────────────────────────
