use super::breaker::{BreakerPermit, BreakerSnapshot, CircuitBreaker};
use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use crate::error::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// One circuit breaker per logical service name.
///
/// Breakers are created lazily with the default configuration on first use and
/// live for the lifetime of the bank. Each breaker carries its own lock, so
/// decisions for different services never contend.
#[derive(Debug, Clone)]
pub struct CircuitBreakerBank {
    /// Circuit breakers per service
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
    /// Default configuration
    config: CircuitBreakerConfig,
}

impl CircuitBreakerBank {
    /// Create a new bank; the default configuration is validated up front
    pub fn new(config: CircuitBreakerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            breakers: Arc::new(DashMap::new()),
            config,
        })
    }

    /// Default configuration applied to lazily created breakers
    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Set the configuration of a service's breaker.
    ///
    /// A breaker that already exists is updated in place and keeps its state,
    /// failure count and last failure time. Re-applying an identical
    /// configuration is a no-op.
    pub async fn configure(&self, service: &str, config: CircuitBreakerConfig) -> Result<()> {
        config.validate()?;

        let existing = match self.breakers.entry(service.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(CircuitBreaker::build(service.to_string(), config)));
                return Ok(());
            }
        };

        existing.reconfigure(config).await?;
        Ok(())
    }

    /// Get or create the circuit breaker for a service
    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(service) {
            return breaker.clone();
        }

        self.breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                debug!(service = service, "Creating breaker with default configuration");
                Arc::new(CircuitBreaker::build(
                    service.to_string(),
                    self.config.clone(),
                ))
            })
            .clone()
    }

    /// Check if a call to a service is currently permitted
    pub async fn can_execute(&self, service: &str) -> bool {
        self.breaker(service).can_execute().await
    }

    /// Admit a call to a service, returning a permit that reports its outcome
    pub async fn acquire(&self, service: &str) -> Option<BreakerPermit> {
        self.breaker(service).try_acquire().await
    }

    /// Record a successful call for a service
    pub async fn on_success(&self, service: &str) {
        self.breaker(service).on_success().await;
    }

    /// Record a failed call for a service
    pub async fn on_failure(&self, service: &str) {
        self.breaker(service).on_failure().await;
    }

    /// Get the state of the breaker for a service (`Closed` if none exists yet)
    pub async fn state(&self, service: &str) -> CircuitState {
        match self.existing(service) {
            Some(breaker) => breaker.state().await,
            None => CircuitState::Closed,
        }
    }

    /// Get metrics for a service
    pub async fn metrics(&self, service: &str) -> Option<CircuitBreakerMetrics> {
        match self.existing(service) {
            Some(breaker) => Some(breaker.metrics().await),
            None => None,
        }
    }

    /// Get metrics for every breaker
    pub async fn all_metrics(&self) -> HashMap<String, CircuitBreakerMetrics> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();

        let mut results = HashMap::with_capacity(breakers.len());
        for breaker in breakers {
            results.insert(breaker.service().to_string(), breaker.metrics().await);
        }
        results
    }

    /// Get all service names with breakers
    pub fn services(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot every breaker, sorted by service name
    pub async fn snapshot(&self) -> Vec<BreakerSnapshot> {
        // Collect first so no map shard is held across an await
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|e| e.value().clone()).collect();

        let mut results = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            results.push(breaker.snapshot().await);
        }
        results.sort_by(|a, b| a.service.cmp(&b.service));
        results
    }

    fn existing(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(service).map(|b| b.clone())
    }
}
