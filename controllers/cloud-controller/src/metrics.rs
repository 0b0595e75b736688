//! Prometheus metrics and the health endpoint.
//!
//! `/metrics` exposes reconciliation counters and durations per watched
//! resource kind; `/healthz` answers as long as the process serves HTTP.

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

const NAMESPACE: &str = "osc_ccm";

/// Reconciliation metrics, labeled by resource kind (`service`, `node`)
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    failures: IntCounterVec,
    duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();
        let reconciliations = IntCounterVec::new(
            Opts::new("reconciliations_total", "Reconciliations run").namespace(NAMESPACE),
            &["resource"],
        )?;
        let failures = IntCounterVec::new(
            Opts::new("reconciliation_errors_total", "Reconciliations that failed").namespace(NAMESPACE),
            &["resource", "reason"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("reconcile_duration_seconds", "Duration of one reconciliation")
                .namespace(NAMESPACE)
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
            &["resource"],
        )?;
        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        Ok(Self {
            registry,
            reconciliations,
            failures,
            duration,
        })
    }

    /// Count a reconciliation and time it until the returned guard is dropped
    pub fn start(&self, resource: &str) -> ReconcileTimer {
        self.reconciliations.with_label_values(&[resource]).inc();
        ReconcileTimer {
            histogram: self.duration.with_label_values(&[resource]),
            started: Instant::now(),
        }
    }

    pub fn failure(&self, resource: &str, reason: &str) {
        self.failures.with_label_values(&[resource, reason]).inc();
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ControllerError::InvalidConfig(format!("metrics are not UTF-8: {}", e)))
    }
}

pub struct ReconcileTimer {
    histogram: prometheus::Histogram,
    started: Instant,
}

impl Drop for ReconcileTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.started.elapsed().as_secs_f64());
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn render_metrics(State(metrics): State<Arc<Metrics>>) -> Result<String, StatusCode> {
    metrics.render().map_err(|e| {
        error!("Failed to render metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

/// Serve `/healthz` and `/metrics` until the listener fails
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}
