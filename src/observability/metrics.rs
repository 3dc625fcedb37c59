//! Metrics collection and exposition.
//!
//! # Metrics
//! - `total_requests_received` (counter): requests entering the pipeline
//! - `total_responses_sent` (counter): responses leaving it
//! - `total_responses_sent_by_status` (counter map): keyed by status code text
//! - `total_processing_time_us` (counter): summed handling time
//!
//! The counters live in [`Metrics`], owned by the server and readable through
//! `GET /debug/vars`. Every update is mirrored into the `metrics` facade so a
//! Prometheus exporter (when installed) sees the same series.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;

#[derive(Debug, Default)]
pub struct Metrics {
    requests_received: AtomicU64,
    responses_sent: AtomicU64,
    processing_time_us: AtomicU64,
    responses_by_status: DashMap<String, AtomicU64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests_received: u64,
    pub total_responses_sent: u64,
    pub total_processing_time_us: u64,
    pub total_responses_sent_by_status: BTreeMap<String, u64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("gatekeeper_requests_total").increment(1);
    }

    pub fn record_response(&self, status: StatusCode, started: Instant) {
        let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
        self.processing_time_us.fetch_add(elapsed_us, Ordering::Relaxed);

        let code = status.as_str();
        if let Some(counter) = self.responses_by_status.get(code) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            self.responses_by_status
                .entry(code.to_string())
                .or_default()
                .fetch_add(1, Ordering::Relaxed);
        }

        metrics::counter!("gatekeeper_responses_total", "status" => code.to_string()).increment(1);
        metrics::histogram!("gatekeeper_request_duration_seconds").record(started.elapsed().as_secs_f64());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests_received: self.requests_received.load(Ordering::Relaxed),
            total_responses_sent: self.responses_sent.load(Ordering::Relaxed),
            total_processing_time_us: self.processing_time_us.load(Ordering::Relaxed),
            total_responses_sent_by_status: self
                .responses_by_status
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

/// Count the request, run the rest of the chain, count the response.
pub async fn metrics_middleware(
    State(metrics): State<Arc<Metrics>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    metrics.record_request();
    let response = next.run(request).await;
    metrics.record_response(response.status(), started);
    response
}

pub fn record_rate_limited() {
    metrics::counter!("gatekeeper_rate_limited_total").increment(1);
}

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install Prometheus exporter"),
    }
}
