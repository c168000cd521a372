use crate::error::{InterlinkError, Result};
use crate::registry::{HealthTransition, Registry, ServiceEndpoint};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const HEALTH_CHECK_USER_AGENT: &str = "interlink-health-check";

/// Health check configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Enable the background monitor
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Interval between probe rounds in seconds
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Per-probe timeout in milliseconds, strictly shorter than the interval
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Number of consecutive failed probes before marking unhealthy
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> u64 {
    30
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_unhealthy_threshold() -> usize {
    3
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval(),
            timeout_ms: default_timeout_ms(),
            unhealthy_threshold: default_unhealthy_threshold(),
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(InterlinkError::Config(
                "Health check interval must be > 0".to_string(),
            ));
        }
        if self.timeout_ms == 0 || self.timeout() >= self.interval() {
            return Err(InterlinkError::Config(
                "Health check timeout must be > 0 and shorter than the interval".to_string(),
            ));
        }
        if self.unhealthy_threshold == 0 {
            return Err(InterlinkError::Config(
                "Health check unhealthy_threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of probing one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub service: String,
    pub success: bool,
    pub transition: HealthTransition,
}

/// Periodically probes every registered endpoint and feeds the results into
/// the registry. Probe failures never escape the monitor.
pub struct HealthMonitor {
    registry: Registry,
    config: HealthCheckConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .field("endpoints", &self.registry.len())
            .field("client", &"<reqwest::Client>")
            .finish()
    }
}

impl HealthMonitor {
    /// Create a new health monitor
    pub fn new(registry: Registry, config: HealthCheckConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(HEALTH_CHECK_USER_AGENT)
            .build()
            .map_err(|e| {
                InterlinkError::Internal(format!("Failed to create health check client: {}", e))
            })?;

        Ok(Self {
            registry,
            config,
            client,
        })
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Spawn the monitor loop; it exits when `shutdown` is cancelled
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Run probe rounds until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between rounds; a round in progress finishes,
    /// bounded by the probe timeout.
    pub async fn run(&self, shutdown: CancellationToken) {
        if !self.config.enabled {
            info!("Active health checks disabled");
            return;
        }

        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval_secs,
            timeout_ms = self.config.timeout_ms,
            unhealthy_threshold = self.config.unhealthy_threshold,
            "Health monitor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
                _ = ticker.tick() => {
                    let results = self.check_all().await;
                    debug!(
                        probed = results.len(),
                        healthy = results.iter().filter(|r| r.success).count(),
                        "Health check round complete"
                    );
                }
            }
        }
    }

    /// Probe every registered endpoint once, concurrently
    pub async fn check_all(&self) -> Vec<ProbeResult> {
        let endpoints = self.registry.endpoints();
        let outcomes = join_all(endpoints.iter().map(|endpoint| self.probe(endpoint))).await;

        endpoints
            .iter()
            .zip(outcomes)
            .filter_map(|(endpoint, success)| {
                match self.registry.record_probe(
                    endpoint.name(),
                    success,
                    self.config.unhealthy_threshold,
                ) {
                    Ok(transition) => Some(ProbeResult {
                        service: endpoint.name().to_string(),
                        success,
                        transition,
                    }),
                    Err(e) => {
                        // Deregistered while the probe was in flight
                        debug!(service = endpoint.name(), error = %e, "Dropping probe result");
                        None
                    }
                }
            })
            .collect()
    }

    /// Probe one endpoint; `true` on a 2xx response within the timeout
    async fn probe(&self, endpoint: &Arc<ServiceEndpoint>) -> bool {
        let url = match endpoint.address().health_check_url() {
            Ok(url) => url,
            Err(e) => {
                warn!(service = endpoint.name(), error = %e, "Invalid health check URL");
                return false;
            }
        };

        debug!(service = endpoint.name(), url = %url, "Performing health check");

        match self.client.get(url.clone()).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    debug!(service = endpoint.name(), status = %status, "Health check passed");
                    true
                } else {
                    warn!(
                        service = endpoint.name(),
                        url = %url,
                        status = %status,
                        "Health check failed: non-success status"
                    );
                    false
                }
            }
            Err(e) if e.is_timeout() => {
                warn!(service = endpoint.name(), url = %url, "Health check failed: timeout");
                false
            }
            Err(e) => {
                warn!(
                    service = endpoint.name(),
                    url = %url,
                    error = %e,
                    "Health check failed: request error"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{EndpointAddress, Protocol};

    #[test]
    fn test_default_config() {
        let config = HealthCheckConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval_secs, 30);
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.unhealthy_threshold, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = HealthCheckConfig {
            interval_secs: 1,
            timeout_ms: 1000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = HealthCheckConfig {
            unhealthy_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_health_monitor_creation() {
        let monitor = HealthMonitor::new(Registry::new(), HealthCheckConfig::default()).unwrap();
        assert_eq!(monitor.config().unhealthy_threshold, 3);
    }

    #[tokio::test]
    async fn test_check_all_empty_registry() {
        let monitor = HealthMonitor::new(Registry::new(), HealthCheckConfig::default()).unwrap();
        assert!(monitor.check_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_counts_as_failure() {
        // Bind then release a port so nothing is listening on it
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let registry = Registry::new();
        registry
            .register("down", EndpointAddress::new("127.0.0.1", port, Protocol::Http))
            .unwrap();

        let monitor = HealthMonitor::new(
            registry.clone(),
            HealthCheckConfig {
                timeout_ms: 500,
                unhealthy_threshold: 1,
                ..Default::default()
            },
        )
        .unwrap();

        let results = monitor.check_all().await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].transition, HealthTransition::BecameUnhealthy);
        assert_eq!(registry.lookup("down").unwrap(), None);
    }

    #[tokio::test]
    async fn test_disabled_monitor_returns_immediately() {
        let monitor = HealthMonitor::new(
            Registry::new(),
            HealthCheckConfig {
                enabled: false,
                ..Default::default()
            },
        )
        .unwrap();

        let handle = monitor.start(CancellationToken::new());
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("disabled monitor should exit")
            .unwrap();
    }

    #[tokio::test]
    async fn test_monitor_exits_on_shutdown() {
        let monitor = HealthMonitor::new(Registry::new(), HealthCheckConfig::default()).unwrap();
        let token = CancellationToken::new();
        let handle = monitor.start(token.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor should exit promptly")
            .unwrap();
    }
}
