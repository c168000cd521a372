use crate::circuit_breaker::{CircuitBreakerConfig, RetryConfig};
use crate::client::ClientConfig;
use crate::error::{InterlinkError, Result};
use crate::healthcheck::HealthCheckConfig;
use crate::hotreload::HotReloadConfig;
use crate::registry::endpoint::default_health_check_path;
use crate::registry::{EndpointAddress, Protocol};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Prefix of environment variables that override file settings
pub const ENV_PREFIX: &str = "INTERLINK";

/// Main interlink configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterlinkConfig {
    /// Services to register at startup
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    /// Health monitor settings
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    /// Default circuit breaker for services without an override
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Named breaker profiles services can opt into with `tier`
    #[serde(default)]
    pub tiers: HashMap<String, CircuitBreakerConfig>,
    /// Retry policy of the resilient client
    #[serde(default)]
    pub retry: RetryConfig,
    /// Resilient client settings
    #[serde(default)]
    pub client: ClientConfig,
    /// Status API settings
    #[serde(default)]
    pub admin: AdminConfig,
    /// Config file watching
    #[serde(default)]
    pub hot_reload: HotReloadConfig,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// A service to register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Logical service name
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
    /// Breaker profile from `tiers`
    #[serde(default)]
    pub tier: Option<String>,
    /// Inline breaker settings, taking precedence over `tier`
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl ServiceConfig {
    pub fn address(&self) -> EndpointAddress {
        EndpointAddress::new(self.host.clone(), self.port, self.protocol)
            .with_health_check_path(self.health_check_path.clone())
    }
}

/// Status API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_admin_host")]
    pub host: String,
    #[serde(default = "default_admin_port")]
    pub port: u16,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            host: default_admin_host(),
            port: default_admin_port(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_true() -> bool {
    true
}

fn default_admin_host() -> String {
    "127.0.0.1".to_string()
}

fn default_admin_port() -> u16 {
    9464
}

impl InterlinkConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| InterlinkError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| InterlinkError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load a YAML file layered with `INTERLINK__`-prefixed environment
    /// variables, e.g. `INTERLINK__HEALTH_CHECK__INTERVAL_SECS=10`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path.as_ref()).format(config::FileFormat::Yaml),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| InterlinkError::Config(format!("Failed to load config: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| InterlinkError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Breaker settings for a service: inline override, then tier, then default
    pub fn breaker_config_for(&self, service: &ServiceConfig) -> CircuitBreakerConfig {
        if let Some(config) = &service.circuit_breaker {
            return config.clone();
        }
        service
            .tier
            .as_ref()
            .and_then(|tier| self.tiers.get(tier))
            .cloned()
            .unwrap_or_else(|| self.circuit_breaker.clone())
    }

    /// Services whose breaker differs from the default
    pub fn breaker_overrides(&self) -> Vec<(String, CircuitBreakerConfig)> {
        self.services
            .iter()
            .filter(|s| s.tier.is_some() || s.circuit_breaker.is_some())
            .map(|s| (s.name.clone(), self.breaker_config_for(s)))
            .collect()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();

        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(InterlinkError::Config(
                    "Service name cannot be empty".to_string(),
                ));
            }

            if !names.insert(service.name.as_str()) {
                return Err(InterlinkError::Config(format!(
                    "Duplicate service name: {}",
                    service.name
                )));
            }

            if service.host.trim().is_empty() {
                return Err(InterlinkError::Config(format!(
                    "Host cannot be empty for service: {}",
                    service.name
                )));
            }

            if service.port == 0 {
                return Err(InterlinkError::Config(format!(
                    "Port must be > 0 for service: {}",
                    service.name
                )));
            }

            if !service.health_check_path.starts_with('/') {
                return Err(InterlinkError::Config(format!(
                    "Health check path must start with '/' for service: {}",
                    service.name
                )));
            }

            if let Some(tier) = &service.tier {
                if !self.tiers.contains_key(tier) {
                    return Err(InterlinkError::Config(format!(
                        "Unknown tier '{}' for service: {}",
                        tier, service.name
                    )));
                }
            }

            if let Some(breaker) = &service.circuit_breaker {
                breaker.validate()?;
            }

            service.address().base_url()?;
        }

        self.circuit_breaker.validate()?;
        for breaker in self.tiers.values() {
            breaker.validate()?;
        }

        self.health_check.validate()?;
        self.retry.validate()?;
        self.client.validate()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerAccounting;
    use std::io::Write;

    const SAMPLE: &str = r#"
services:
  - name: payments
    host: "10.0.0.5"
    port: 8080
    health_check_path: /healthz
    tier: database
  - name: analytics
    host: analytics.internal
    port: 443
    protocol: https
    circuit_breaker:
      failure_threshold: 20
      recovery_timeout_secs: 5
  - name: search
    host: "10.0.0.7"
    port: 9200

health_check:
  interval_secs: 10
  timeout_ms: 2000
  unhealthy_threshold: 3

circuit_breaker:
  failure_threshold: 5
  recovery_timeout_secs: 30

tiers:
  database:
    failure_threshold: 2
    recovery_timeout_secs: 60

retry:
  max_retries: 2
  base_backoff_ms: 50

client:
  request_timeout_ms: 2000
  breaker_accounting: every_attempt
"#;

    #[test]
    fn test_parse_valid_config() {
        let config = InterlinkConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.services.len(), 3);
        assert_eq!(config.services[0].health_check_path, "/healthz");
        assert_eq!(config.services[1].protocol, Protocol::Https);
        assert_eq!(config.services[2].health_check_path, "/health");
        assert_eq!(config.health_check.interval_secs, 10);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.client.request_timeout_ms, 2000);
        assert_eq!(
            config.client.breaker_accounting,
            BreakerAccounting::EveryAttempt
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = InterlinkConfig::from_yaml("services: []").unwrap();
        assert_eq!(config.health_check.interval_secs, 30);
        assert_eq!(config.health_check.timeout_ms, 5000);
        assert_eq!(config.health_check.unhealthy_threshold, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.admin.port, 9464);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_breaker_precedence() {
        let config = InterlinkConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(
            config.breaker_config_for(&config.services[0]).failure_threshold,
            2
        );
        assert_eq!(
            config.breaker_config_for(&config.services[1]).failure_threshold,
            20
        );
        assert_eq!(
            config.breaker_config_for(&config.services[2]).failure_threshold,
            5
        );

        let overrides = config.breaker_overrides();
        assert_eq!(overrides.len(), 2);
        assert!(overrides.iter().all(|(name, _)| name != "search"));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut config = InterlinkConfig::from_yaml(SAMPLE).unwrap();
        let dup = config.services[0].clone();
        config.services.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_tier() {
        let mut config = InterlinkConfig::from_yaml(SAMPLE).unwrap();
        config.services[2].tier = Some("gold".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = InterlinkConfig::from_yaml(SAMPLE).unwrap();
        config.tiers.get_mut("database").unwrap().failure_threshold = 0;
        assert!(matches!(
            config.validate(),
            Err(InterlinkError::InvalidBreakerConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_service_fields() {
        let base = InterlinkConfig::from_yaml(SAMPLE).unwrap();

        let mut config = base.clone();
        config.services[0].port = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.services[0].health_check_path = "healthz".to_string();
        assert!(config.validate().is_err());

        let mut config = base;
        config.services[0].host = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_probe_timeout_not_shorter_than_interval() {
        let mut config = InterlinkConfig::default();
        config.health_check.interval_secs = 5;
        config.health_check.timeout_ms = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bundled_config_is_valid() {
        let config = InterlinkConfig::from_yaml(include_str!("../../config/interlink.yaml")).unwrap();
        assert_eq!(config.services.len(), 3);
        assert!(config.hot_reload.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_with_env_override() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        std::env::set_var("INTERLINK__HEALTH_CHECK__UNHEALTHY_THRESHOLD", "7");
        let config = InterlinkConfig::load(file.path()).unwrap();
        std::env::remove_var("INTERLINK__HEALTH_CHECK__UNHEALTHY_THRESHOLD");

        assert_eq!(config.health_check.unhealthy_threshold, 7);
        assert_eq!(config.health_check.interval_secs, 10);
        assert_eq!(config.services.len(), 3);
        assert!(config.validate().is_ok());
    }
}
