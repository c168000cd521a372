pub mod endpoint;

pub use endpoint::{EndpointAddress, EndpointSnapshot, HealthTransition, Protocol, ServiceEndpoint};

use crate::config::ServiceConfig;
use crate::error::{InterlinkError, Result};
use crate::metrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// In-memory table of service endpoints and their last-known health.
///
/// The registry never performs network calls itself; health is fed in by the
/// [`HealthMonitor`](crate::healthcheck::HealthMonitor). Cloning is cheap and
/// clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    endpoints: Arc<DashMap<String, Arc<ServiceEndpoint>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update a service.
    ///
    /// Re-registering an existing name replaces its connection details but keeps
    /// its health state until the next probe.
    pub fn register(&self, name: &str, address: EndpointAddress) -> Result<()> {
        if name.trim().is_empty() {
            return Err(InterlinkError::Config(
                "Service name cannot be empty".to_string(),
            ));
        }

        // Read and replace under one shard lock
        let endpoint = match self.endpoints.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().address() == &address {
                    return Ok(());
                }
                let updated = Arc::new(ServiceEndpoint::with_health(
                    name.to_string(),
                    address,
                    entry.get().health(),
                )?);
                entry.insert(Arc::clone(&updated));
                updated
            }
            Entry::Vacant(entry) => {
                let created = Arc::new(ServiceEndpoint::new(name.to_string(), address)?);
                entry.insert(Arc::clone(&created));
                created
            }
        };

        info!(
            service = name,
            url = %endpoint.url(),
            health_check_path = %endpoint.address().health_check_path,
            "Registered service"
        );
        metrics::record_endpoint_health(name, endpoint.is_healthy());
        Ok(())
    }

    /// Register a service from its configuration entry
    pub fn register_service(&self, service: &ServiceConfig) -> Result<()> {
        self.register(&service.name, service.address())
    }

    /// Remove a service. Returns whether an entry existed.
    pub fn deregister(&self, name: &str) -> bool {
        let removed = self.endpoints.remove(name).is_some();
        if removed {
            info!(service = name, "Deregistered service");
        } else {
            debug!(service = name, "Deregister ignored, service not registered");
        }
        removed
    }

    /// Connection URL of a service if it is currently healthy.
    ///
    /// `Ok(None)` means the service is known but unhealthy; an unknown name is a
    /// `ServiceNotFound` error.
    pub fn lookup(&self, name: &str) -> Result<Option<Url>> {
        let endpoint = self
            .endpoints
            .get(name)
            .ok_or_else(|| InterlinkError::ServiceNotFound(name.to_string()))?;

        if endpoint.is_healthy() {
            Ok(Some(endpoint.url().clone()))
        } else {
            Ok(None)
        }
    }

    /// Like [`lookup`](Self::lookup), mapping an unhealthy service to `ServiceUnavailable`
    pub fn resolve(&self, name: &str) -> Result<Url> {
        self.lookup(name)?
            .ok_or_else(|| InterlinkError::ServiceUnavailable(name.to_string()))
    }

    pub fn mark_healthy(&self, name: &str) -> Result<()> {
        let endpoint = self.require(name)?;
        if endpoint.mark_healthy() {
            info!(service = name, "Service marked healthy");
        }
        metrics::record_endpoint_health(name, true);
        Ok(())
    }

    pub fn mark_unhealthy(&self, name: &str) -> Result<()> {
        let endpoint = self.require(name)?;
        if endpoint.mark_unhealthy() {
            warn!(service = name, "Service marked unhealthy");
        }
        metrics::record_endpoint_health(name, false);
        Ok(())
    }

    /// Apply one health probe result to a service
    pub fn record_probe(
        &self,
        name: &str,
        success: bool,
        unhealthy_threshold: usize,
    ) -> Result<HealthTransition> {
        let endpoint = self.require(name)?;
        let transition = endpoint.record_probe(success, unhealthy_threshold);

        match transition {
            HealthTransition::BecameHealthy => {
                info!(service = name, "Service recovered, marked healthy");
            }
            HealthTransition::BecameUnhealthy => {
                warn!(
                    service = name,
                    consecutive_failures = endpoint.consecutive_failures(),
                    "Service marked unhealthy"
                );
            }
            HealthTransition::Unchanged => {}
        }
        metrics::record_health_probe(name, success);
        metrics::record_endpoint_health(name, endpoint.is_healthy());

        Ok(transition)
    }

    /// Registered endpoint for a name
    pub fn get(&self, name: &str) -> Option<Arc<ServiceEndpoint>> {
        self.endpoints.get(name).map(|e| e.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    /// All registered endpoints
    pub fn endpoints(&self) -> Vec<Arc<ServiceEndpoint>> {
        self.endpoints.iter().map(|e| e.value().clone()).collect()
    }

    /// Snapshot of every endpoint, sorted by name
    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        let mut snapshots: Vec<EndpointSnapshot> =
            self.endpoints.iter().map(|e| e.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Make the registry match a list of services: register every listed
    /// service and deregister every name not listed.
    pub fn reconcile(&self, services: &[ServiceConfig]) -> Result<()> {
        // Validate every address before touching the table
        for service in services {
            service.address().base_url()?;
        }

        let wanted: HashSet<&str> = services.iter().map(|s| s.name.as_str()).collect();
        let stale: Vec<String> = self
            .endpoints
            .iter()
            .filter(|e| !wanted.contains(e.key().as_str()))
            .map(|e| e.key().clone())
            .collect();

        for name in stale {
            self.deregister(&name);
        }
        for service in services {
            self.register_service(service)?;
        }
        Ok(())
    }

    fn require(&self, name: &str) -> Result<Arc<ServiceEndpoint>> {
        self.get(name)
            .ok_or_else(|| InterlinkError::ServiceNotFound(name.to_string()))
    }
}
