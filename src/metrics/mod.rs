use crate::circuit_breaker::CircuitState;
use crate::error::{InterlinkError, Result};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Prometheus recorder for interlink metrics.
///
/// The `record_*` helpers are no-ops until a recorder is installed, so
/// libraries and tests can call them freely.
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsService").finish_non_exhaustive()
    }
}

impl MetricsService {
    /// Install the global Prometheus recorder
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            InterlinkError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    fn register_metrics() {
        // Registry and health monitor
        describe_gauge!(
            "interlink_endpoint_healthy",
            "Endpoint health status (1 = healthy, 0 = unhealthy)"
        );
        describe_counter!(
            "interlink_health_probes_total",
            "Total number of health probes by result"
        );

        // Circuit breakers
        describe_gauge!(
            "interlink_circuit_breaker_state",
            "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
        );
        describe_counter!(
            "interlink_circuit_breaker_transitions_total",
            "Total number of circuit breaker state transitions"
        );

        // Resilient client
        describe_counter!(
            "interlink_client_requests_total",
            "Total number of client calls that reached the network, by outcome"
        );
        describe_histogram!(
            "interlink_client_request_duration_seconds",
            "Client call latency in seconds, including retries"
        );
        describe_counter!(
            "interlink_client_retries_total",
            "Total number of retried attempts"
        );
        describe_counter!(
            "interlink_client_rejections_total",
            "Total number of client calls rejected before reaching the network"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Record endpoint health status
pub fn record_endpoint_health(service: &str, healthy: bool) {
    let labels = [("service", service.to_string())];
    gauge!("interlink_endpoint_healthy", &labels).set(if healthy { 1.0 } else { 0.0 });
}

/// Record one health probe
pub fn record_health_probe(service: &str, success: bool) {
    let labels = [
        ("service", service.to_string()),
        ("result", if success { "success" } else { "failure" }.to_string()),
    ];
    counter!("interlink_health_probes_total", &labels).increment(1);
}

/// Record circuit breaker state
pub fn record_circuit_breaker_state(service: &str, state: CircuitState) {
    let labels = [("service", service.to_string())];
    gauge!("interlink_circuit_breaker_state", &labels).set(state.as_gauge() as f64);
}

/// Record circuit breaker transition
pub fn record_circuit_breaker_transition(service: &str, from: CircuitState, to: CircuitState) {
    let labels = [
        ("service", service.to_string()),
        ("from", from.to_string()),
        ("to", to.to_string()),
    ];
    counter!("interlink_circuit_breaker_transitions_total", &labels).increment(1);
}

/// Record a finished client call
pub fn record_client_request(service: &str, outcome: &str, duration: f64) {
    let labels = [
        ("service", service.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!("interlink_client_requests_total", &labels).increment(1);
    histogram!("interlink_client_request_duration_seconds", &labels).record(duration);
}

/// Record a retried attempt
pub fn record_client_retry() {
    counter!("interlink_client_retries_total").increment(1);
}

/// Record a call rejected before reaching the network
pub fn record_client_rejection(service: &str, reason: &str) {
    let labels = [
        ("service", service.to_string()),
        ("reason", reason.to_string()),
    ];
    counter!("interlink_client_rejections_total", &labels).increment(1);
}
