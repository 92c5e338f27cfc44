//! Stage timings, route labels, and the process-wide metrics registry.
//! The registry is one of the few pieces of global state in the crate
//! (alongside the model singletons and the cache handle); it's built once
//! at startup and exposed read-only afterward.

use std::collections::BTreeMap;
use std::time::Instant;

use prometheus::{
    opts, register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_with_registry, Encoder, HistogramVec, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};

/// Timings for every stage that actually ran, in execution order.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StageTimings(pub BTreeMap<String, f64>);

impl StageTimings {
    pub fn record(&mut self, stage: &str, started: Instant) {
        self.0.insert(stage.to_string(), started.elapsed().as_secs_f64() * 1000.0);
    }
}

/// The `+`-joined list of stages that actually executed, built up in
/// pipeline order as the orchestrator runs.
#[derive(Debug, Clone, Default)]
pub struct RouteBuilder(Vec<String>);

impl RouteBuilder {
    pub fn push(&mut self, stage: &str) {
        self.0.push(stage.to_string());
    }

    pub fn finish(self) -> String {
        if self.0.is_empty() {
            "none".to_string()
        } else {
            self.0.join("+")
        }
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

/// Process-wide Prometheus metrics, exposed via `/v1/metrics`.
pub struct Metrics {
    pub registry: Registry,
    pub requests_total: IntCounterVec,
    pub tokens_before_total: IntCounterVec,
    pub tokens_after_total: IntCounterVec,
    pub tokens_saved_total: IntCounterVec,
    pub cache_hits_total: IntCounterVec,
    pub cache_misses_total: IntCounterVec,
    pub route_total: IntCounterVec,
    pub dashboard_events_total: IntCounterVec,
    pub latency_seconds: HistogramVec,
    pub in_flight_requests: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = register_int_counter_vec_with_registry!(
            opts!("promptopt_requests_total", "Total requests by endpoint and status"),
            &["endpoint", "status"],
            registry
        )
        .expect("requests_total registers");

        let tokens_before_total = register_int_counter_vec_with_registry!(
            opts!("promptopt_tokens_before_total", "Tokens before optimization"),
            &["endpoint"],
            registry
        )
        .expect("tokens_before_total registers");

        let tokens_after_total = register_int_counter_vec_with_registry!(
            opts!("promptopt_tokens_after_total", "Tokens after optimization"),
            &["endpoint"],
            registry
        )
        .expect("tokens_after_total registers");

        let tokens_saved_total = register_int_counter_vec_with_registry!(
            opts!("promptopt_tokens_saved_total", "Tokens saved by optimization"),
            &["endpoint"],
            registry
        )
        .expect("tokens_saved_total registers");

        let cache_hits_total = register_int_counter_vec_with_registry!(
            opts!("promptopt_cache_hits_total", "Result cache hits"),
            &["endpoint"],
            registry
        )
        .expect("cache_hits_total registers");

        let cache_misses_total = register_int_counter_vec_with_registry!(
            opts!("promptopt_cache_misses_total", "Result cache misses"),
            &["endpoint"],
            registry
        )
        .expect("cache_misses_total registers");

        let route_total = register_int_counter_vec_with_registry!(
            opts!("promptopt_route_total", "Count of requests by pipeline route"),
            &["route"],
            registry
        )
        .expect("route_total registers");

        let dashboard_events_total = register_int_counter_vec_with_registry!(
            opts!("promptopt_dashboard_events_total", "Dashboard event emissions by outcome"),
            &["outcome"],
            registry
        )
        .expect("dashboard_events_total registers");

        let latency_seconds = register_histogram_vec_with_registry!(
            "promptopt_latency_seconds",
            "Request latency by endpoint",
            &["endpoint"],
            registry
        )
        .expect("latency_seconds registers");

        let in_flight_requests = register_int_gauge_with_registry!(
            opts!("promptopt_in_flight_requests", "Requests currently being served"),
            registry
        )
        .expect("in_flight_requests registers");

        Self {
            registry,
            requests_total,
            tokens_before_total,
            tokens_after_total,
            tokens_saved_total,
            cache_hits_total,
            cache_misses_total,
            route_total,
            dashboard_events_total,
            latency_seconds,
            in_flight_requests,
        }
    }

    pub fn record_optimization(&self, endpoint: &str, tokens_before: u32, tokens_after: u32, cache_hit: bool, route: &str) {
        self.tokens_before_total.with_label_values(&[endpoint]).inc_by(tokens_before as u64);
        self.tokens_after_total.with_label_values(&[endpoint]).inc_by(tokens_after as u64);
        self.tokens_saved_total
            .with_label_values(&[endpoint])
            .inc_by(tokens_before.saturating_sub(tokens_after) as u64);
        if cache_hit {
            self.cache_hits_total.with_label_values(&[endpoint]).inc();
        } else {
            self.cache_misses_total.with_label_values(&[endpoint]).inc();
        }
        self.route_total.with_label_values(&[route]).inc();
    }

    /// Render in the standard Prometheus text exposition format.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_builder_joins_with_plus() {
        let mut builder = RouteBuilder::default();
        builder.push("heuristic");
        builder.push("semantic");
        assert_eq!(builder.finish(), "heuristic+semantic");
    }

    #[test]
    fn empty_route_builder_reports_none() {
        assert_eq!(RouteBuilder::default().finish(), "none");
    }

    #[test]
    fn export_produces_nonempty_text() {
        let metrics = Metrics::new();
        metrics.record_optimization("optimize", 1000, 500, false, "heuristic");
        let text = metrics.export();
        assert!(text.contains("promptopt_tokens_before_total"));
    }
}
