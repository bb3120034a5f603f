/// Count-based circuit breaker
///
/// The state is derived from two counters rather than stored:
/// - Closed: `failure_count < failure_threshold`
/// - Open: threshold reached and the last failure is younger than `timeout`
/// - HalfOpen: threshold reached and `timeout` has elapsed; the next call is a probe
///
/// A success in any state resets `failure_count` to 0. A failed probe bumps the
/// count and refreshes the last failure time, so the circuit re-opens at once.
///
/// Calls are serialized through an async gate held for the whole duration of the
/// wrapped future, so at most one probe is ever in flight against a failing
/// dependency. The counters sit behind their own short lock and `state()` never
/// waits on an in-flight call.
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Failing fast without touching the dependency
    Open,
    /// Cool-down elapsed, the next call is let through as a probe
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures needed to open the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is allowed
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker open - backend unavailable")]
    Open,
    #[error("{0}")]
    Inner(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open)
    }
}

#[derive(Debug, Default)]
struct Counters {
    failure_count: u32,
    last_failure: Option<Instant>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    counters: Arc<Mutex<Counters>>,
    gate: Arc<AsyncMutex<()>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            counters: Arc::new(Mutex::new(Counters::default())),
            gate: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Run `f` under circuit breaker protection.
    ///
    /// Returns [`CircuitBreakerError::Open`] without invoking `f` while the
    /// circuit is open; otherwise propagates the outcome of `f`.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _gate = self.gate.lock().await;

        let state = self.state();
        match state {
            CircuitState::Open => {
                debug!("Circuit breaker open, failing fast");
                return Err(CircuitBreakerError::Open);
            }
            CircuitState::HalfOpen => info!("Circuit breaker: Open → HalfOpen (probing)"),
            CircuitState::Closed => {}
        }

        match f().await {
            Ok(value) => {
                self.record_success(state);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(state);
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    /// Current state (for monitoring and tests)
    pub fn state(&self) -> CircuitState {
        let counters = self.counters.lock();
        self.derive_state(&counters)
    }

    pub fn failure_count(&self) -> u32 {
        self.counters.lock().failure_count
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn derive_state(&self, counters: &Counters) -> CircuitState {
        if counters.failure_count < self.config.failure_threshold {
            return CircuitState::Closed;
        }
        match counters.last_failure {
            Some(at) if at.elapsed() < self.config.timeout => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    fn record_success(&self, observed: CircuitState) {
        let mut counters = self.counters.lock();
        counters.failure_count = 0;
        if observed == CircuitState::HalfOpen {
            info!("Circuit breaker: HalfOpen → Closed");
        }
    }

    fn record_failure(&self, observed: CircuitState) {
        let mut counters = self.counters.lock();
        counters.failure_count = counters.failure_count.saturating_add(1);
        counters.last_failure = Some(Instant::now());

        match observed {
            CircuitState::HalfOpen => warn!("Circuit breaker: HalfOpen → Open (probe failed)"),
            CircuitState::Closed if counters.failure_count >= self.config.failure_threshold => {
                warn!(
                    failures = counters.failure_count,
                    "Circuit breaker: Closed → Open"
                );
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            timeout,
        })
    }

    #[tokio::test]
    async fn test_circuit_opens_after_threshold_failures() {
        let cb = breaker(3, Duration::from_secs(60));

        for _ in 0..2 {
            let _ = cb.call(|| async { Err::<(), _>("error") }).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        let _ = cb.call(|| async { Err::<(), _>("error") }).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.failure_count(), 3);
    }

    #[tokio::test]
    async fn test_open_circuit_does_not_invoke_call() {
        let cb = breaker(2, Duration::from_secs(60));
        for _ in 0..2 {
            let _ = cb.call(|| async { Err::<(), _>("error") }).await;
        }

        let invoked = AtomicU32::new(0);
        let result = cb
            .call(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;

        assert!(matches!(result, Err(CircuitBreakerError::Open)));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = breaker(5, Duration::from_secs(60));
        for _ in 0..4 {
            let _ = cb.call(|| async { Err::<(), _>("error") }).await;
        }
        assert_eq!(cb.failure_count(), 4);

        let _ = cb.call(|| async { Ok::<_, &str>(()) }).await;
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_halfopen_probe_success_closes() {
        let cb = breaker(2, Duration::from_millis(100));
        for _ in 0..2 {
            let _ = cb.call(|| async { Err::<(), _>("error") }).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let result = cb.call(|| async { Ok::<_, &str>(42) }).await;
        assert_eq!(result.ok(), Some(42));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_halfopen_probe_failure_reopens() {
        let cb = breaker(2, Duration::from_millis(100));
        for _ in 0..2 {
            let _ = cb.call(|| async { Err::<(), _>("error") }).await;
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        let result = cb.call(|| async { Err::<(), _>("still down") }).await;

        assert!(matches!(result, Err(CircuitBreakerError::Inner("still down"))));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_inner_error_is_propagated() {
        let cb = breaker(5, Duration::from_secs(60));
        let err = cb
            .call(|| async { Err::<(), _>("boom".to_string()) })
            .await
            .unwrap_err();

        assert!(!err.is_open());
        assert_eq!(err.to_string(), "boom");
    }
}
