//! # Resilience Module
//!
//! Per-service circuit breakers that stop traffic to a repeatedly failing
//! backend for a cooldown period, plus the clock they measure cooldowns with.
//!
//! ## Usage
//!
//! ```rust
//! use diabetactic_gateway::resilience::{CircuitBreaker, CircuitState, ManualClock};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let clock = Arc::new(ManualClock::new());
//! let breaker = CircuitBreaker::new("glucoserver", 2, Duration::from_secs(30), clock.clone());
//!
//! breaker.record_failure();
//! breaker.record_failure();
//! assert!(!breaker.allow_request());
//!
//! clock.advance(Duration::from_secs(30));
//! assert!(breaker.allow_request());
//! assert_eq!(breaker.state(), CircuitState::HalfOpen);
//! ```

pub mod circuit_breaker;
pub mod clock;
pub mod manager;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerState, CircuitState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
