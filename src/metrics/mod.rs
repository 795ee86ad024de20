//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Advance cycles and their latency
//! - Provider stage transitions
//! - Record writes
//! - Exchange failures and open sessions

use crate::error::{TrackerError, TrackerResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_int_counter,
    register_int_counter_vec, CounterVec, Encoder, Gauge, Histogram, IntCounter, IntCounterVec,
    TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref CYCLES: IntCounter = register_int_counter!(
        "bridge_tracker_cycles_total",
        "Total advance cycles run"
    ).unwrap();

    pub static ref CYCLE_LATENCY: Histogram = register_histogram!(
        "bridge_tracker_cycle_latency_seconds",
        "Advance cycle latency including provider calls",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    pub static ref STAGE_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "bridge_tracker_stage_transitions_total",
        "Stage transitions observed per provider",
        &["provider", "stage"]
    ).unwrap();

    pub static ref RECORD_WRITES: IntCounter = register_int_counter!(
        "bridge_tracker_record_writes_total",
        "Total bridge record writes"
    ).unwrap();

    pub static ref EXCHANGE_FAILURES: IntCounter = register_int_counter!(
        "bridge_tracker_exchange_failures_total",
        "Exchange steps that failed and cancelled a bridge"
    ).unwrap();

    pub static ref ACTIVE_SESSIONS: Gauge = register_gauge!(
        "bridge_tracker_active_sessions",
        "Bridge sessions currently polling"
    ).unwrap();

    pub static ref HEALTH_CHECKS: CounterVec = register_counter_vec!(
        "bridge_tracker_health_checks_total",
        "Health checks by result",
        &["result"]
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

    pub async fn run(&self) -> TrackerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| TrackerError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| TrackerError::Internal(e.to_string()))?;

        Ok(())
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

pub fn record_cycle(latency_secs: f64) {
    CYCLES.inc();
    CYCLE_LATENCY.observe(latency_secs);
}

pub fn record_stage(provider: &str, stage: &str) {
    STAGE_TRANSITIONS.with_label_values(&[provider, stage]).inc();
}

pub fn record_write() {
    RECORD_WRITES.inc();
}

pub fn record_exchange_failure() {
    EXCHANGE_FAILURES.inc();
}

pub fn set_active_sessions(count: usize) {
    ACTIVE_SESSIONS.set(count as f64);
}

pub fn record_health_check(healthy: bool) {
    let result = if healthy { "success" } else { "failure" };
    HEALTH_CHECKS.with_label_values(&[result]).inc();
}
