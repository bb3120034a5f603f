/// Preset configurations per dependency type
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::timeout::TimeoutConfig;
use std::time::Duration;

/// Configuration bundle for one external dependency
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub timeout: TimeoutConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Identity provider (HTTP user-info lookup on every new connection)
///
/// - Timeout: 10s
/// - Circuit breaker: 5 failures, 60s cool-down
/// - No retry: a failed handshake is reported to the peer instead
pub fn identity_provider_config() -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig::new(Duration::from_secs(10)),
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_provider_preset() {
        let config = identity_provider_config();
        assert_eq!(config.timeout.duration, Duration::from_secs(10));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.timeout, Duration::from_secs(60));
    }
}
