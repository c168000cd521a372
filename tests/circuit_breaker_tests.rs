use interlink::circuit_breaker::{CircuitBreakerBank, CircuitBreakerConfig, CircuitState};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::advance;

fn bank(failure_threshold: u32, recovery_timeout_secs: u64) -> CircuitBreakerBank {
    CircuitBreakerBank::new(CircuitBreakerConfig {
        failure_threshold,
        recovery_timeout_secs,
    })
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_search_breaker_lifecycle() {
    let breakers = bank(2, 10);

    // Two failed calls open the breaker
    for _ in 0..2 {
        assert!(breakers.can_execute("search").await);
        breakers.on_failure("search").await;
    }
    assert_eq!(breakers.state("search").await, CircuitState::Open);
    assert!(!breakers.can_execute("search").await);

    // Still open just before the recovery timeout
    advance(Duration::from_millis(9_999)).await;
    assert!(!breakers.can_execute("search").await);

    // One trial after the timeout
    advance(Duration::from_millis(1)).await;
    assert!(breakers.can_execute("search").await);
    assert_eq!(breakers.state("search").await, CircuitState::HalfOpen);
    assert!(!breakers.can_execute("search").await);

    // A failing trial reopens and restarts the clock
    breakers.on_failure("search").await;
    assert_eq!(breakers.state("search").await, CircuitState::Open);
    advance(Duration::from_secs(9)).await;
    assert!(!breakers.can_execute("search").await);
    advance(Duration::from_secs(1)).await;
    assert!(breakers.can_execute("search").await);

    // A successful trial closes it
    breakers.on_success("search").await;
    assert_eq!(breakers.state("search").await, CircuitState::Closed);
    assert!(breakers.can_execute("search").await);

    let metrics = breakers.metrics("search").await.unwrap();
    assert_eq!(metrics.failed_requests, 3);
    assert_eq!(metrics.successful_requests, 1);
    assert_eq!(metrics.circuit_opened_count, 2);
    assert_eq!(metrics.circuit_half_opened_count, 2);
    assert_eq!(metrics.circuit_closed_count, 1);
}

#[tokio::test]
async fn test_success_resets_failure_count() {
    let breakers = bank(3, 30);

    breakers.on_failure("orders").await;
    breakers.on_failure("orders").await;
    breakers.on_success("orders").await;
    breakers.on_failure("orders").await;
    breakers.on_failure("orders").await;

    assert_eq!(breakers.state("orders").await, CircuitState::Closed);
    breakers.on_failure("orders").await;
    assert_eq!(breakers.state("orders").await, CircuitState::Open);
}

#[tokio::test]
async fn test_multiple_services_are_isolated() {
    let breakers = bank(1, 30);

    breakers.on_failure("search").await;

    assert_eq!(breakers.state("search").await, CircuitState::Open);
    assert!(!breakers.can_execute("search").await);
    assert_eq!(breakers.state("payments").await, CircuitState::Closed);
    assert!(breakers.can_execute("payments").await);
}

#[tokio::test(start_paused = true)]
async fn test_per_service_override() {
    let breakers = bank(5, 30);
    breakers
        .configure(
            "payments",
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout_secs: 5,
            },
        )
        .await
        .unwrap();

    breakers.on_failure("payments").await;
    breakers.on_failure("search").await;
    assert_eq!(breakers.state("payments").await, CircuitState::Open);
    assert_eq!(breakers.state("search").await, CircuitState::Closed);

    advance(Duration::from_secs(5)).await;
    assert!(breakers.can_execute("payments").await);
}

#[tokio::test]
async fn test_invalid_override_is_rejected() {
    let breakers = bank(5, 30);
    let result = breakers
        .configure(
            "payments",
            CircuitBreakerConfig {
                failure_threshold: 0,
                recovery_timeout_secs: 5,
            },
        )
        .await;
    assert!(result.is_err());
    assert_eq!(breakers.breaker("payments").config().await.failure_threshold, 5);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_get_one_trial() {
    let breakers = bank(1, 1);
    breakers.on_failure("search").await;
    advance(Duration::from_secs(1)).await;

    let breakers = Arc::new(breakers);
    let handles: Vec<_> = (0..32)
        .map(|_| {
            let breakers = Arc::clone(&breakers);
            tokio::spawn(async move { breakers.can_execute("search").await })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
}

#[tokio::test]
async fn test_snapshot_lists_breakers_sorted() {
    let breakers = bank(1, 30);
    breakers.on_failure("search").await;
    breakers.on_success("analytics").await;

    let snapshot = breakers.snapshot().await;
    let names: Vec<_> = snapshot.iter().map(|s| s.service.as_str()).collect();
    assert_eq!(names, vec!["analytics", "search"]);
    assert_eq!(snapshot[1].state, CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_reconfigure_while_open_keeps_clock() {
    let breakers = bank(1, 10);
    breakers.on_failure("db").await;

    advance(Duration::from_secs(6)).await;
    breakers
        .configure(
            "db",
            CircuitBreakerConfig {
                failure_threshold: 3,
                recovery_timeout_secs: 10,
            },
        )
        .await
        .unwrap();
    assert_eq!(breakers.state("db").await, CircuitState::Open);
    assert!(!breakers.can_execute("db").await);

    // Recovery still counts from the original failure
    advance(Duration::from_secs(4)).await;
    assert!(breakers.can_execute("db").await);
}

#[tokio::test(start_paused = true)]
async fn test_permit_trial_outlives_recovery_timeout() {
    let breakers = bank(1, 1);
    breakers.on_failure("search").await;
    advance(Duration::from_secs(1)).await;

    let trial = breakers.acquire("search").await.unwrap();
    advance(Duration::from_secs(30)).await;
    assert!(breakers.acquire("search").await.is_none());

    trial.failure().await;
    assert_eq!(breakers.state("search").await, CircuitState::Open);
}
