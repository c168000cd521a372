pub mod bank;
pub mod breaker;
pub mod retry;
pub mod types;

pub use bank::CircuitBreakerBank;
pub use breaker::{BreakerPermit, BreakerSnapshot, CircuitBreaker};
pub use retry::RetryExecutor;
pub use types::{
    BreakerAccounting, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, RetryConfig,
};
