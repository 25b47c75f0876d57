//! Failure isolation for calls to external dependencies.
//!
//! - `CircuitBreaker`: CLOSED/OPEN/HALF_OPEN state machine per dependency
//! - `BreakerRegistry`: owned, injectable map of breakers keyed by name
//! - `RetryPolicy`: bounded exponential backoff with jitter
//! - `guarded_call`: retry nested inside a breaker, the only sanctioned
//!   way to reach the broker

pub mod breaker;
pub mod error;
pub mod guarded;
pub mod registry;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerState, BreakerStatus, CircuitBreaker};
pub use error::{BreakerError, RetryError};
pub use guarded::{guarded_call, GuardedError};
pub use registry::BreakerRegistry;
pub use retry::{RetryConfig, RetryPolicy, RetryableError};
