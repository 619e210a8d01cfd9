//! Gateway core.
//!
//! # Data Flow
//! ```text
//! GatewayRequest
//!     → routing (longest prefix, 404 on miss)
//!     → identity (401 when the route requires it)
//!     → rate limit (429 with retry-after)
//!     → circuit breaker (503 while open)
//!     → response cache (GET/HEAD on routes with a TTL)
//!     → upstream with deadline and retries
//!     → breaker + metrics bookkeeping, cache fill
//! ```

pub mod error;
pub mod pipeline;

pub use self::error::GatewayError;
pub use self::pipeline::{Gateway, GatewayRequest};
