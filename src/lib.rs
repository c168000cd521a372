pub mod admin;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod healthcheck;
pub mod hotreload;
pub mod metrics;
pub mod registry;

use crate::admin::AdminState;
use crate::circuit_breaker::CircuitBreakerBank;
use crate::client::ResilientClient;
use crate::config::{InterlinkConfig, LogFormat, LoggingConfig};
use crate::error::Result;
use crate::healthcheck::HealthMonitor;
use crate::hotreload::HotReloadService;
use crate::metrics::MetricsService;
use crate::registry::Registry;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Registry, breaker bank and client assembled from one configuration
#[derive(Debug, Clone)]
pub struct Interlink {
    config: InterlinkConfig,
    registry: Registry,
    breakers: CircuitBreakerBank,
    client: ResilientClient,
    metrics: Option<MetricsService>,
    config_path: Option<PathBuf>,
}

impl Interlink {
    /// Validate `config`, register its services and build the client
    pub async fn from_config(config: InterlinkConfig) -> Result<Self> {
        config.validate()?;

        let registry = Registry::new();
        registry.reconcile(&config.services)?;

        let breakers = CircuitBreakerBank::new(config.circuit_breaker.clone())?;
        for (service, breaker) in config.breaker_overrides() {
            breakers.configure(&service, breaker).await?;
        }

        let client = ResilientClient::new(
            registry.clone(),
            breakers.clone(),
            config.retry.clone(),
            config.client.clone(),
        )?;

        info!(services = registry.len(), "Interlink initialized");

        Ok(Self {
            config,
            registry,
            breakers,
            client,
            metrics: None,
            config_path: None,
        })
    }

    /// Expose `metrics` on the status API
    pub fn with_metrics(mut self, metrics: MetricsService) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Watch `path` for changes when hot reload is enabled
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &InterlinkConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn breakers(&self) -> &CircuitBreakerBank {
        &self.breakers
    }

    pub fn client(&self) -> &ResilientClient {
        &self.client
    }

    /// Build a health monitor over this registry
    pub fn health_monitor(&self) -> Result<HealthMonitor> {
        HealthMonitor::new(self.registry.clone(), self.config.health_check.clone())
    }

    /// Run the health monitor, hot reload watcher and status API until
    /// `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let monitor = self.health_monitor()?.start(shutdown.child_token());

        let reload = match (&self.config_path, self.config.hot_reload.enabled) {
            (Some(path), true) => Some(
                HotReloadService::new(
                    path.clone(),
                    self.registry.clone(),
                    self.breakers.clone(),
                    self.config.hot_reload.debounce_ms,
                )
                .start(shutdown.child_token())?,
            ),
            (None, true) => {
                warn!("Hot reload enabled but no config path given, skipping");
                None
            }
            _ => None,
        };

        let served = if self.config.admin.enabled {
            let state = AdminState {
                registry: self.registry.clone(),
                breakers: self.breakers.clone(),
                metrics: self.metrics.clone(),
            };
            admin::serve(&self.config.admin, state, shutdown.clone()).await
        } else {
            shutdown.cancelled().await;
            Ok(())
        };

        // Stop background tasks even if the status API failed
        shutdown.cancel();
        let _ = monitor.await;
        if let Some(reload) = reload {
            let _ = reload.await;
        }

        info!("Interlink stopped");
        served
    }
}

/// Initialize tracing/logging
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "interlink=debug,tower_http=info".into());

    match logging.format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
    }
}
