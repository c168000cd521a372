use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for interlink operations
pub type Result<T> = std::result::Result<T, InterlinkError>;

/// Interlink error types
#[derive(Error, Debug)]
pub enum InterlinkError {
    /// No registry entry exists for the name
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Entry exists but is currently marked unhealthy
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Breaker for the service is open
    #[error("Circuit open for service: {0}")]
    CircuitOpen(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected status {status} from service {service}")]
    UnexpectedStatus { service: String, status: u16 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid circuit breaker configuration: {0}")]
    InvalidBreakerConfig(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl InterlinkError {
    /// Whether a client attempt that failed with this error may be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InterlinkError::Timeout(_) | InterlinkError::Transport(_)
        )
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            InterlinkError::ServiceNotFound(_) => StatusCode::NOT_FOUND,
            InterlinkError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            InterlinkError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            InterlinkError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            InterlinkError::Transport(_) => StatusCode::BAD_GATEWAY,
            InterlinkError::UnexpectedStatus { .. } => StatusCode::BAD_GATEWAY,
            InterlinkError::Serialization(_) => StatusCode::BAD_GATEWAY,
            InterlinkError::InvalidBreakerConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
            InterlinkError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            InterlinkError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            InterlinkError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            InterlinkError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for InterlinkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            InterlinkError::Timeout(e.to_string())
        } else if e.is_decode() {
            InterlinkError::Serialization(e.to_string())
        } else if e.is_builder() {
            InterlinkError::InvalidUrl(e.to_string())
        } else {
            InterlinkError::Transport(e.to_string())
        }
    }
}

impl IntoResponse for InterlinkError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
