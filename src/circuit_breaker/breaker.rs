use super::types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
use crate::error::Result;
use crate::metrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker for a single logical service
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Current state and configuration
    state: RwLock<State>,
    /// Service name
    service: String,
}

#[derive(Debug)]
struct State {
    /// Configuration, replaceable in place
    config: CircuitBreakerConfig,
    /// Current circuit state
    circuit_state: CircuitState,
    /// Consecutive failures since the circuit last closed
    failure_count: u32,
    /// Most recent recorded failure
    last_failure_at: Option<Instant>,
    /// Generation of the half-open trial currently in flight
    trial: Option<u64>,
    /// Last generation handed out to a trial
    generation: u64,
    /// Metrics
    metrics: CircuitBreakerMetrics,
}

/// How a call was let through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// Normal traffic while closed
    Closed,
    /// The half-open trial with this generation
    Trial(u64),
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    /// Seconds since the most recent recorded failure
    pub last_failure_secs_ago: Option<f64>,
    pub trial_in_flight: bool,
    pub metrics: CircuitBreakerMetrics,
}

/// An admitted call.
///
/// Report the outcome with [`success`](Self::success) or
/// [`failure`](Self::failure), or hand it back unused with
/// [`release`](Self::release). A half-open trial permit dropped without a
/// report frees the trial slot without counting a failure. Outcomes are only
/// allowed to move a half-open breaker when they come from its current trial.
#[derive(Debug)]
#[must_use = "an unreported trial permit holds the half-open slot until dropped"]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    admission: Admission,
    reported: bool,
}

impl BreakerPermit {
    /// Whether this permit is the half-open trial
    pub fn is_trial(&self) -> bool {
        matches!(self.admission, Admission::Trial(_))
    }

    pub async fn success(mut self) {
        self.reported = true;
        self.breaker.record_success(Some(self.admission)).await;
    }

    pub async fn failure(mut self) {
        self.reported = true;
        self.breaker.record_failure(Some(self.admission)).await;
    }

    /// Give the permit back without an outcome
    pub async fn release(mut self) {
        self.reported = true;
        if let Admission::Trial(generation) = self.admission {
            let mut state = self.breaker.state.write().await;
            self.breaker.release_trial(&mut state, generation);
        }
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if self.reported {
            return;
        }
        let Admission::Trial(generation) = self.admission else {
            return;
        };

        if let Ok(mut state) = self.breaker.state.try_write() {
            self.breaker.release_trial(&mut state, generation);
            return;
        }

        let breaker = Arc::clone(&self.breaker);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let mut state = breaker.state.write().await;
                    breaker.release_trial(&mut state, generation);
                });
            }
            Err(_) => warn!(
                service = %breaker.service,
                "Trial permit dropped outside a runtime, trial slot stays taken"
            ),
        }
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker, rejecting invalid thresholds
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(service.into(), config))
    }

    /// Build from a configuration that has already been validated
    pub(super) fn build(service: String, config: CircuitBreakerConfig) -> Self {
        info!(
            service = %service,
            failure_threshold = config.failure_threshold,
            recovery_timeout_secs = config.recovery_timeout_secs,
            "Creating circuit breaker"
        );
        metrics::record_circuit_breaker_state(&service, CircuitState::Closed);

        Self {
            state: RwLock::new(State {
                config,
                circuit_state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                trial: None,
                generation: 0,
                metrics: CircuitBreakerMetrics::default(),
            }),
            service,
        }
    }

    /// Service this breaker guards
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current configuration
    pub async fn config(&self) -> CircuitBreakerConfig {
        self.state.read().await.config.clone()
    }

    /// Replace the configuration, keeping state, failure count and last
    /// failure time. Returns whether anything changed.
    ///
    /// A lowered threshold takes effect on the next failure.
    pub async fn reconfigure(&self, config: CircuitBreakerConfig) -> Result<bool> {
        config.validate()?;

        let mut state = self.state.write().await;
        if state.config == config {
            return Ok(false);
        }

        info!(
            service = %self.service,
            state = %state.circuit_state,
            failure_threshold = config.failure_threshold,
            recovery_timeout_secs = config.recovery_timeout_secs,
            "Reconfiguring circuit breaker"
        );
        state.config = config;
        Ok(true)
    }

    /// Decide whether a call may proceed.
    ///
    /// May move the breaker from `Open` to `HalfOpen`. The decision is made under
    /// the write lock, so of several callers racing an elapsed recovery timeout
    /// exactly one is admitted as the trial. A trial admitted here stays in
    /// flight until `on_success` or `on_failure` is called.
    pub async fn can_execute(&self) -> bool {
        let mut state = self.state.write().await;
        self.admit(&mut state).is_some()
    }

    /// Like [`can_execute`](Self::can_execute), returning a permit that
    /// carries the outcome back to this breaker
    pub async fn try_acquire(self: &Arc<Self>) -> Option<BreakerPermit> {
        let admission = {
            let mut state = self.state.write().await;
            self.admit(&mut state)?
        };

        Some(BreakerPermit {
            breaker: Arc::clone(self),
            admission,
            reported: false,
        })
    }

    /// Record a successful call
    pub async fn on_success(&self) {
        self.record_success(None).await;
    }

    /// Record a failed call
    pub async fn on_failure(&self) {
        self.record_failure(None).await;
    }

    /// Get current state
    pub async fn state(&self) -> CircuitState {
        self.state.read().await.circuit_state
    }

    /// Consecutive failures since the circuit last closed
    pub async fn failure_count(&self) -> u32 {
        self.state.read().await.failure_count
    }

    /// Timestamp of the most recent recorded failure
    pub async fn last_failure_at(&self) -> Option<Instant> {
        self.state.read().await.last_failure_at
    }

    /// Get metrics
    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        self.state.read().await.metrics.clone()
    }

    pub async fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.read().await;
        BreakerSnapshot {
            service: self.service.clone(),
            state: state.circuit_state,
            failure_count: state.failure_count,
            failure_threshold: state.config.failure_threshold,
            recovery_timeout_secs: state.config.recovery_timeout_secs,
            last_failure_secs_ago: state.last_failure_at.map(|at| at.elapsed().as_secs_f64()),
            trial_in_flight: state.trial.is_some(),
            metrics: state.metrics.clone(),
        }
    }

    fn admit(&self, state: &mut State) -> Option<Admission> {
        match state.circuit_state {
            CircuitState::Closed => {
                state.metrics.admitted_requests += 1;
                Some(Admission::Closed)
            }
            CircuitState::Open => {
                let recovery_timeout = state.config.recovery_timeout();
                let elapsed = state
                    .last_failure_at
                    .map(|at| Instant::now().saturating_duration_since(at))
                    .unwrap_or(Duration::MAX);

                if elapsed >= recovery_timeout {
                    self.transition_to_half_open(state);
                    Some(self.start_trial(state))
                } else {
                    state.metrics.rejected_requests += 1;
                    debug!(
                        service = %self.service,
                        time_remaining = ?recovery_timeout - elapsed,
                        "Circuit breaker open, rejecting request"
                    );
                    None
                }
            }
            CircuitState::HalfOpen if state.trial.is_none() => {
                debug!(service = %self.service, "Previous trial released, admitting a new trial");
                Some(self.start_trial(state))
            }
            CircuitState::HalfOpen => {
                state.metrics.rejected_requests += 1;
                debug!(
                    service = %self.service,
                    "Trial request already in flight, rejecting"
                );
                None
            }
        }
    }

    fn start_trial(&self, state: &mut State) -> Admission {
        state.generation += 1;
        state.trial = Some(state.generation);
        state.metrics.admitted_requests += 1;
        Admission::Trial(state.generation)
    }

    /// Whether an outcome may move a half-open breaker. Outcomes without an
    /// admission come from callers using the plain `on_*` methods.
    fn owns_trial(state: &State, admission: Option<Admission>) -> bool {
        match admission {
            None => true,
            Some(Admission::Trial(generation)) => state.trial == Some(generation),
            Some(Admission::Closed) => false,
        }
    }

    async fn record_success(&self, admission: Option<Admission>) {
        let mut state = self.state.write().await;
        state.metrics.successful_requests += 1;

        match state.circuit_state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen if Self::owns_trial(&state, admission) => {
                debug!(service = %self.service, "Trial request succeeded");
                self.transition_to_closed(&mut state);
            }
            CircuitState::HalfOpen => {
                debug!(service = %self.service, "Ignoring success from a call that is not the trial");
            }
            CircuitState::Open => {
                // A call admitted before the circuit tripped
                debug!(service = %self.service, "Recording success in open state");
            }
        }
    }

    async fn record_failure(&self, admission: Option<Admission>) {
        let mut state = self.state.write().await;
        state.metrics.failed_requests += 1;

        match state.circuit_state {
            CircuitState::Closed => {
                state.last_failure_at = Some(Instant::now());
                state.failure_count += 1;

                debug!(
                    service = %self.service,
                    failure_count = state.failure_count,
                    threshold = state.config.failure_threshold,
                    "Request failed in closed state"
                );

                if state.failure_count >= state.config.failure_threshold {
                    self.transition_to_open(&mut state, CircuitState::Closed);
                }
            }
            CircuitState::HalfOpen if Self::owns_trial(&state, admission) => {
                state.last_failure_at = Some(Instant::now());
                warn!(
                    service = %self.service,
                    "Trial request failed, reopening circuit"
                );
                self.transition_to_open(&mut state, CircuitState::HalfOpen);
            }
            CircuitState::HalfOpen => {
                debug!(service = %self.service, "Ignoring failure from a call that is not the trial");
            }
            CircuitState::Open => {
                state.last_failure_at = Some(Instant::now());
                debug!(service = %self.service, "Recording failure in open state");
            }
        }
    }

    fn release_trial(&self, state: &mut State, generation: u64) {
        if state.circuit_state == CircuitState::HalfOpen && state.trial == Some(generation) {
            debug!(service = %self.service, "Trial released without an outcome");
            state.trial = None;
        }
    }

    fn transition_to_open(&self, state: &mut State, from: CircuitState) {
        info!(
            service = %self.service,
            failure_count = state.failure_count,
            from = %from,
            "Circuit breaker opening"
        );

        state.circuit_state = CircuitState::Open;
        state.trial = None;
        state.metrics.circuit_opened_count += 1;
        self.publish(from, CircuitState::Open);
    }

    fn transition_to_half_open(&self, state: &mut State) {
        info!(
            service = %self.service,
            recovery_timeout = ?state.config.recovery_timeout(),
            "Circuit breaker transitioning to half-open"
        );

        state.circuit_state = CircuitState::HalfOpen;
        state.metrics.circuit_half_opened_count += 1;
        self.publish(CircuitState::Open, CircuitState::HalfOpen);
    }

    fn transition_to_closed(&self, state: &mut State) {
        info!(service = %self.service, "Circuit breaker closing");

        state.circuit_state = CircuitState::Closed;
        state.failure_count = 0;
        state.trial = None;
        state.metrics.circuit_closed_count += 1;
        self.publish(CircuitState::HalfOpen, CircuitState::Closed);
    }

    fn publish(&self, from: CircuitState, to: CircuitState) {
        metrics::record_circuit_breaker_state(&self.service, to);
        metrics::record_circuit_breaker_transition(&self.service, from, to);
    }
}
