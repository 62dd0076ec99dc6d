//! Probe and metrics endpoints
//!
//! - `/healthz`: the process is up
//! - `/readyz`: the PatroniCluster cache has synced and workers are running
//! - `/metrics`: Prometheus text exposition

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// Default port for the health server
pub const DEFAULT_HEALTH_PORT: u16 = 8118;

const METRIC_PREFIX: &str = "patroni_operator";

const OPENMETRICS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Per-cluster label set
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterLabels {
    pub namespace: String,
    pub name: String,
}

impl ClusterLabels {
    fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

/// How a reconcile pass ended: done, requeue, requeue_after or error
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: String,
}

/// Controller metrics, all registered under the `patroni_operator_` prefix
pub struct Metrics {
    pub reconciles: Family<ClusterLabels, Counter>,
    pub reconcile_failures: Family<ClusterLabels, Counter>,
    pub reconcile_duration: Family<ClusterLabels, Histogram>,
    pub outcomes: Family<OutcomeLabels, Counter>,
    /// Keys that left the queue without converging
    pub dropped_keys: Counter,
    /// Keys waiting to be handed to a worker
    pub queue_depth: Gauge,
    /// Unix seconds of the last successful reconcile, 0 if none yet
    pub last_reconcile: Gauge,

    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix(METRIC_PREFIX);

        let reconciles = Family::<ClusterLabels, Counter>::default();
        let reconcile_failures = Family::<ClusterLabels, Counter>::default();
        let reconcile_duration = Family::<ClusterLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.001, 2.0, 15))
        });
        let outcomes = Family::<OutcomeLabels, Counter>::default();
        let dropped_keys = Counter::default();
        let queue_depth = Gauge::default();
        let last_reconcile = Gauge::default();

        registry.register(
            "reconciliations",
            "Successful PatroniCluster reconcile passes",
            reconciles.clone(),
        );
        registry.register(
            "reconciliation_errors",
            "Failed PatroniCluster reconcile passes",
            reconcile_failures.clone(),
        );
        registry.register(
            "reconcile_duration_seconds",
            "Wall time of successful reconcile passes",
            reconcile_duration.clone(),
        );
        registry.register(
            "reconcile_outcomes",
            "Reconcile passes by outcome",
            outcomes.clone(),
        );
        registry.register(
            "dropped_keys",
            "Keys dropped from the work queue without a successful reconcile",
            dropped_keys.clone(),
        );
        registry.register(
            "queue_depth",
            "Keys waiting in the work queue",
            queue_depth.clone(),
        );
        registry.register(
            "last_reconcile_timestamp_seconds",
            "Unix time of the last successful reconcile pass",
            last_reconcile.clone(),
        );

        Self {
            reconciles,
            reconcile_failures,
            reconcile_duration,
            outcomes,
            dropped_keys,
            queue_depth,
            last_reconcile,
            registry,
        }
    }

    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ClusterLabels::new(namespace, name);
        self.reconciles.get_or_create(&labels).inc();
        self.reconcile_duration
            .get_or_create(&labels)
            .observe(duration_secs);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.last_reconcile
            .set(i64::try_from(now).unwrap_or(i64::MAX));
    }

    pub fn record_error(&self, namespace: &str, name: &str) {
        self.reconcile_failures
            .get_or_create(&ClusterLabels::new(namespace, name))
            .inc();
    }

    pub fn record_outcome(&self, outcome: &str) {
        self.outcomes
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn record_dropped(&self) {
        self.dropped_keys.inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Prometheus text rendering of every registered metric
    pub fn render(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!(error = %e, "Failed to encode metrics");
            buffer.clear();
        }
        buffer
    }
}

/// State shared between the controller and the health server
pub struct HealthState {
    /// Set once the cache has synced, cleared on shutdown
    pub ready: RwLock<bool>,
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    match state.is_ready().await {
        true => (StatusCode::OK, "ready").into_response(),
        false => (StatusCode::SERVICE_UNAVAILABLE, "cache not synced").into_response(),
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, OPENMETRICS_TEXT)],
        state.metrics.render(),
    )
}

pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the probe and metrics endpoints on `0.0.0.0:{port}`
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Health server listening");
    axum::serve(listener, create_router(state)).await
}
