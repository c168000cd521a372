use crate::error::{InterlinkError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

/// Transport protocol of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Connection details of a service endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAddress {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
}

pub(crate) fn default_health_check_path() -> String {
    "/health".to_string()
}

impl EndpointAddress {
    pub fn new(host: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            health_check_path: default_health_check_path(),
        }
    }

    pub fn with_health_check_path(mut self, path: impl Into<String>) -> Self {
        self.health_check_path = path.into();
        self
    }

    /// Base URL, e.g. `http://10.0.0.5:8080`
    pub fn base_url(&self) -> Result<Url> {
        let raw = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&raw).map_err(|e| InterlinkError::InvalidUrl(format!("{}: {}", raw, e)))
    }

    /// URL of the health-check path
    pub fn health_check_url(&self) -> Result<Url> {
        self.base_url()?
            .join(&self.health_check_path)
            .map_err(|e| InterlinkError::InvalidUrl(format!("{}: {}", self.health_check_path, e)))
    }
}

/// A registered service endpoint.
///
/// Connection details are immutable; re-registration builds a new endpoint that
/// shares the previous one's [`HealthStatus`].
#[derive(Debug)]
pub struct ServiceEndpoint {
    name: String,
    address: EndpointAddress,
    /// Validated at registration
    url: Url,
    health: Arc<HealthStatus>,
}

/// Health state of an endpoint, owned by the registry and mutated by the monitor
#[derive(Debug)]
pub(crate) struct HealthStatus {
    /// Whether the endpoint is healthy
    is_healthy: AtomicBool,
    /// Consecutive failed probes
    consecutive_failures: AtomicUsize,
    /// Last probe timestamp (Unix epoch millis, 0 = never)
    last_checked_at: AtomicU64,
}

impl HealthStatus {
    fn new() -> Self {
        Self {
            is_healthy: AtomicBool::new(true), // Start as healthy
            consecutive_failures: AtomicUsize::new(0),
            last_checked_at: AtomicU64::new(0),
        }
    }
}

/// Outcome of recording a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    Unchanged,
    BecameHealthy,
    BecameUnhealthy,
}

impl ServiceEndpoint {
    pub(crate) fn new(name: String, address: EndpointAddress) -> Result<Self> {
        Self::with_health(name, address, Arc::new(HealthStatus::new()))
    }

    pub(crate) fn with_health(
        name: String,
        address: EndpointAddress,
        health: Arc<HealthStatus>,
    ) -> Result<Self> {
        let url = address.base_url()?;
        Ok(Self {
            name,
            address,
            url,
            health,
        })
    }

    pub(crate) fn health(&self) -> Arc<HealthStatus> {
        self.health.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &EndpointAddress {
        &self.address
    }

    /// Connection URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy.load(Ordering::Acquire)
    }

    pub fn consecutive_failures(&self) -> usize {
        self.health.consecutive_failures.load(Ordering::Acquire)
    }

    /// Time of the last probe, if any
    pub fn last_checked_at(&self) -> Option<SystemTime> {
        match self.health.last_checked_at.load(Ordering::Acquire) {
            0 => None,
            millis => Some(UNIX_EPOCH + Duration::from_millis(millis)),
        }
    }

    pub(crate) fn mark_healthy(&self) -> bool {
        !self.health.is_healthy.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn mark_unhealthy(&self) -> bool {
        self.health.is_healthy.swap(false, Ordering::AcqRel)
    }

    /// Record a probe result.
    ///
    /// A success resets the failure streak and marks the endpoint healthy. A
    /// failure extends the streak and marks the endpoint unhealthy once the
    /// streak reaches `unhealthy_threshold`.
    pub(crate) fn record_probe(&self, success: bool, unhealthy_threshold: usize) -> HealthTransition {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_millis(1))
            .as_millis() as u64;
        self.health.last_checked_at.store(now.max(1), Ordering::Release);

        if success {
            self.health.consecutive_failures.store(0, Ordering::Release);
            if self.mark_healthy() {
                return HealthTransition::BecameHealthy;
            }
        } else {
            let failures = self
                .health
                .consecutive_failures
                .fetch_add(1, Ordering::AcqRel)
                + 1;

            if failures >= unhealthy_threshold && self.mark_unhealthy() {
                return HealthTransition::BecameUnhealthy;
            }
        }

        HealthTransition::Unchanged
    }

    pub fn snapshot(&self) -> EndpointSnapshot {
        EndpointSnapshot {
            name: self.name.clone(),
            url: self.url.to_string(),
            protocol: self.address.protocol,
            health_check_path: self.address.health_check_path.clone(),
            is_healthy: self.is_healthy(),
            consecutive_failures: self.consecutive_failures(),
            last_checked_at_ms: match self.health.last_checked_at.load(Ordering::Acquire) {
                0 => None,
                millis => Some(millis),
            },
        }
    }
}

/// Serializable view of an endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub name: String,
    pub url: String,
    pub protocol: Protocol,
    pub health_check_path: String,
    pub is_healthy: bool,
    pub consecutive_failures: usize,
    /// Unix epoch millis of the last probe
    pub last_checked_at_ms: Option<u64>,
}
