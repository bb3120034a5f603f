//! Resilience primitives for calls that leave the process
//!
//! - **Circuit Breaker**: count-based breaker that fails fast while a dependency is down
//! - **Timeout**: deadline folded into the guarded call's result
//! - **Presets**: tuned settings per dependency type
//!
//! # Example: guarding an identity lookup
//!
//! ```rust,no_run
//! use resilience::{presets, CircuitBreaker};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = presets::identity_provider_config();
//!     let breaker = CircuitBreaker::new(config.circuit_breaker);
//!
//!     let result = breaker
//!         .call(|| async {
//!             // HTTP call to the identity provider
//!             Ok::<_, String>(())
//!         })
//!         .await;
//! }
//! ```

pub mod circuit_breaker;
pub mod presets;
pub mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use presets::{identity_provider_config, ServiceConfig};
pub use timeout::{TimeoutConfig, TimeoutError};
