//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to an upstream service:
//!     → circuit_breaker.rs (admit, or fail fast while the service is down)
//!     → timeouts.rs (deadline per attempt)
//!     → retries.rs (retry transient failures with backoff.rs delays)
//!     → circuit_breaker.rs (record the final outcome once)
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{Admission, BreakerRegistry, BreakerSnapshot, CircuitState, ProbeGuard};
pub use retries::{call_with_retries, CallFailure, CallReport};
