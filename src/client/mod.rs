//! Resilient client used by services to call one another.
//!
//! A call is checked against the service's circuit breaker, resolved through
//! the registry and sent with a per-attempt timeout. Transport failures are
//! retried with exponential backoff; 5xx responses count as breaker failures
//! but are handed back to the caller.

use crate::circuit_breaker::{
    BreakerAccounting, BreakerPermit, CircuitBreakerBank, RetryConfig, RetryExecutor,
};
use crate::error::{InterlinkError, Result};
use crate::metrics;
use crate::registry::Registry;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Resilient client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout of a single attempt in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Connection establishment timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// How retried calls are reported to the circuit breaker
    #[serde(default)]
    pub breaker_accounting: BreakerAccounting,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            breaker_accounting: BreakerAccounting::default(),
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(InterlinkError::Config(
                "Client request_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(InterlinkError::Config(
                "Client connect_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-call overrides of the client defaults
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub max_retries: Option<u32>,
    pub base_backoff_ms: Option<u64>,
    /// Per-attempt timeout
    pub timeout: Option<Duration>,
    pub headers: HeaderMap,
}

impl RequestOptions {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn base_backoff_ms(mut self, base_backoff_ms: u64) -> Self {
        self.base_backoff_ms = Some(base_backoff_ms);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn header(mut self, name: http::header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// Why a single attempt did not produce a usable response
enum AttemptError {
    /// Timeout or connection-level failure
    Transport(InterlinkError),
    /// The service answered with a 5xx
    ServerError(reqwest::Response),
    /// The breaker stopped admitting calls between attempts
    Rejected,
}

impl AttemptError {
    fn is_retryable(&self, retry_on_server_error: bool) -> bool {
        match self {
            AttemptError::Transport(e) => e.is_retryable(),
            AttemptError::ServerError(_) => retry_on_server_error,
            AttemptError::Rejected => false,
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Transport(e) => write!(f, "{}", e),
            AttemptError::ServerError(response) => {
                write!(f, "server error status {}", response.status())
            }
            AttemptError::Rejected => write!(f, "circuit breaker stopped admitting attempts"),
        }
    }
}

/// Everything an attempt needs, shared by all attempts of one call
struct Call<'a> {
    service: &'a str,
    method: Method,
    url: Url,
    body: Option<Bytes>,
    headers: HeaderMap,
    timeout: Duration,
    /// Breaker admission taken before the first attempt
    permit: Mutex<Option<BreakerPermit>>,
}

impl Call<'_> {
    fn take_permit(&self) -> Option<BreakerPermit> {
        self.permit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Client combining registry lookup, circuit breaking and retries
#[derive(Debug, Clone)]
pub struct ResilientClient {
    registry: Registry,
    breakers: CircuitBreakerBank,
    http: reqwest::Client,
    retry: RetryExecutor,
    config: ClientConfig,
}

impl ResilientClient {
    /// Create a new resilient client
    pub fn new(
        registry: Registry,
        breakers: CircuitBreakerBank,
        retry: RetryConfig,
        config: ClientConfig,
    ) -> Result<Self> {
        retry.validate()?;
        config.validate()?;

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| InterlinkError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            registry,
            breakers,
            http,
            retry: RetryExecutor::new(retry),
            config,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn breakers(&self) -> &CircuitBreakerBank {
        &self.breakers
    }

    /// Send a request to a service with the client defaults
    pub async fn request(
        &self,
        service: &str,
        path: &str,
        method: Method,
        body: Option<Bytes>,
    ) -> Result<reqwest::Response> {
        self.request_with(service, path, method, body, RequestOptions::default())
            .await
    }

    /// Send a request to a service.
    ///
    /// Returns `CircuitOpen` without touching the network when the breaker
    /// rejects the call, `ServiceNotFound`/`ServiceUnavailable` when the
    /// registry has no healthy endpoint, the final transport error once
    /// retries are exhausted, and otherwise the response (including 5xx).
    pub async fn request_with(
        &self,
        service: &str,
        path: &str,
        method: Method,
        body: Option<Bytes>,
        options: RequestOptions,
    ) -> Result<reqwest::Response> {
        let started = Instant::now();

        let Some(permit) = self.breakers.acquire(service).await else {
            debug!(service = service, "Circuit open, failing fast");
            metrics::record_client_rejection(service, "circuit_open");
            return Err(InterlinkError::CircuitOpen(service.to_string()));
        };

        let base = match self.registry.resolve(service) {
            Ok(base) => base,
            Err(e) => {
                // Not a service failure; hand back the admission
                permit.release().await;
                debug!(service = service, error = %e, "No healthy endpoint");
                metrics::record_client_rejection(service, "unavailable");
                return Err(e);
            }
        };

        let url = match join_path(&base, path) {
            Ok(url) => url,
            Err(e) => {
                permit.release().await;
                return Err(e);
            }
        };

        let mut headers = options.headers.clone();
        let request_id = Uuid::new_v4().to_string();
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert(REQUEST_ID_HEADER, value);
        }

        let call = Call {
            service,
            url,
            method,
            body,
            headers,
            timeout: options.timeout.unwrap_or(self.config.request_timeout()),
            permit: Mutex::new(Some(permit)),
        };

        debug!(
            service = service,
            method = %call.method,
            url = %call.url,
            request_id = %request_id,
            "Sending request"
        );

        let retry = self
            .retry
            .with_overrides(options.max_retries, options.base_backoff_ms);
        let retry_on_server_error = retry.config().retry_on_server_error;
        let call = &call;

        let outcome = retry
            .execute(
                move |attempt| self.attempt(call, attempt),
                |e| e.is_retryable(retry_on_server_error),
            )
            .await;

        let elapsed = started.elapsed().as_secs_f64();
        // Still held only under `LastAttempt`
        let permit = call.take_permit();

        match outcome {
            Ok(response) => {
                if let Some(permit) = permit {
                    permit.success().await;
                }
                metrics::record_client_request(service, "success", elapsed);
                Ok(response)
            }
            Err(AttemptError::ServerError(response)) => {
                if let Some(permit) = permit {
                    permit.failure().await;
                }
                warn!(
                    service = service,
                    status = %response.status(),
                    "Service answered with a server error"
                );
                metrics::record_client_request(service, "server_error", elapsed);
                Ok(response)
            }
            Err(AttemptError::Transport(e)) => {
                if let Some(permit) = permit {
                    permit.failure().await;
                }
                warn!(service = service, error = %e, "Request failed");
                metrics::record_client_request(service, "transport_error", elapsed);
                Err(e)
            }
            Err(AttemptError::Rejected) => {
                info!(service = service, "Circuit opened during retries, giving up");
                metrics::record_client_rejection(service, "circuit_open");
                Err(InterlinkError::CircuitOpen(service.to_string()))
            }
        }
    }

    /// GET a path from a service
    pub async fn get(&self, service: &str, path: &str) -> Result<reqwest::Response> {
        self.request(service, path, Method::GET, None).await
    }

    /// GET a path and decode a successful JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, service: &str, path: &str) -> Result<T> {
        let response = self.get(service, path).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(InterlinkError::UnexpectedStatus {
                service: service.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json::<T>().await?)
    }

    /// POST a JSON body to a service
    pub async fn post_json<B: Serialize>(
        &self,
        service: &str,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| InterlinkError::Serialization(e.to_string()))?;
        let options = RequestOptions::default().header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.request_with(service, path, Method::POST, Some(Bytes::from(bytes)), options)
            .await
    }

    async fn attempt(
        &self,
        call: &Call<'_>,
        attempt: u32,
    ) -> std::result::Result<reqwest::Response, AttemptError> {
        // Under `EveryAttempt` each attempt carries its own admission
        let permit = match self.config.breaker_accounting {
            BreakerAccounting::LastAttempt => None,
            BreakerAccounting::EveryAttempt => match call.take_permit() {
                Some(permit) => Some(permit),
                None => match self.breakers.acquire(call.service).await {
                    Some(permit) => Some(permit),
                    None => {
                        debug!(service = call.service, attempt, "Breaker stopped admitting attempts");
                        return Err(AttemptError::Rejected);
                    }
                },
            },
        };

        let mut builder = self
            .http
            .request(call.method.clone(), call.url.clone())
            .headers(call.headers.clone())
            .timeout(call.timeout);
        if let Some(body) = &call.body {
            builder = builder.body(body.clone());
        }

        match builder.send().await {
            Ok(response) if response.status().is_server_error() => {
                if let Some(permit) = permit {
                    permit.failure().await;
                }
                Err(AttemptError::ServerError(response))
            }
            Ok(response) => {
                if let Some(permit) = permit {
                    permit.success().await;
                }
                Ok(response)
            }
            Err(e) => {
                if let Some(permit) = permit {
                    permit.failure().await;
                }
                Err(AttemptError::Transport(e.into()))
            }
        }
    }
}

/// Append a request path to a service base URL without letting it change the host
fn join_path(base: &Url, path: &str) -> Result<Url> {
    if path.starts_with("//") || path.contains("://") {
        return Err(InterlinkError::InvalidUrl(format!(
            "Request path must be relative: {}",
            path
        )));
    }

    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    base.join(&path)
        .map_err(|e| InterlinkError::InvalidUrl(format!("{}: {}", path, e)))
}
