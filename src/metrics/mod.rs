//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Plans created and run outcomes
//! - Step latency by kind
//! - Session events, failures and storage purges
//! - Poll outcomes

use crate::error::{OrchestratorError, OrchestratorResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

lazy_static! {
    // Planning metrics
    pub static ref PLANS_CREATED: CounterVec = register_counter_vec!(
        "xfuel_plans_created_total",
        "Total plans created by source and destination family",
        &["source_family", "destination_family"]
    ).unwrap();

    // Run metrics
    pub static ref RUNS_FINISHED: CounterVec = register_counter_vec!(
        "xfuel_runs_finished_total",
        "Total runs reaching a terminal state",
        &["outcome"]
    ).unwrap();

    pub static ref STEPS_FINISHED: CounterVec = register_counter_vec!(
        "xfuel_steps_finished_total",
        "Total steps finished by kind and outcome",
        &["kind", "outcome"]
    ).unwrap();

    pub static ref STEP_LATENCY: HistogramVec = register_histogram_vec!(
        "xfuel_step_latency_seconds",
        "Step latency including any status polling",
        &["kind"],
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0]
    ).unwrap();

    // Session metrics
    pub static ref SESSION_EVENTS: CounterVec = register_counter_vec!(
        "xfuel_session_events_total",
        "Total session events published by family and event",
        &["family", "event"]
    ).unwrap();

    pub static ref SESSION_FAILURES: CounterVec = register_counter_vec!(
        "xfuel_session_failures_total",
        "Total failed handshakes by family and failure kind",
        &["family", "kind"]
    ).unwrap();

    pub static ref SESSION_PURGES: CounterVec = register_counter_vec!(
        "xfuel_session_purges_total",
        "Total purges of persisted session artifacts",
        &["family", "reason"]
    ).unwrap();

    // Poll metrics
    pub static ref POLLS_FINISHED: CounterVec = register_counter_vec!(
        "xfuel_polls_finished_total",
        "Total status polls by purpose and outcome",
        &["poll", "status"]
    ).unwrap();

    pub static ref POLL_ATTEMPTS: HistogramVec = register_histogram_vec!(
        "xfuel_poll_attempts",
        "Checks performed before a poll finished",
        &["poll"],
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 60.0, 120.0]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> OrchestratorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("Metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("Metrics server: {}", e)))
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_plan_created(source_family: &str, destination_family: &str) {
    PLANS_CREATED
        .with_label_values(&[source_family, destination_family])
        .inc();
}

pub fn record_run(outcome: &str) {
    RUNS_FINISHED.with_label_values(&[outcome]).inc();
}

pub fn record_step(kind: &str, outcome: &str, latency: Duration) {
    STEPS_FINISHED.with_label_values(&[kind, outcome]).inc();
    STEP_LATENCY
        .with_label_values(&[kind])
        .observe(latency.as_secs_f64());
}

pub fn record_session_event(family: &str, event: &str) {
    SESSION_EVENTS.with_label_values(&[family, event]).inc();
}

pub fn record_session_failure(family: &str, kind: &str) {
    SESSION_FAILURES.with_label_values(&[family, kind]).inc();
}

pub fn record_session_purge(family: &str, reason: &str) {
    SESSION_PURGES.with_label_values(&[family, reason]).inc();
}

pub fn record_poll(poll: &str, status: &str, attempts: u32) {
    POLLS_FINISHED.with_label_values(&[poll, status]).inc();
    POLL_ATTEMPTS
        .with_label_values(&[poll])
        .observe(attempts as f64);
}
