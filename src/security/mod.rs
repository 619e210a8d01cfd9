//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → identity.rs (validate the bearer credential)
//!     → rate_limit.rs (fixed-window admission per user, IP or globally)
//!     → Pass to the breaker and upstream
//! ```
//!
//! # Design Decisions
//! - Fail closed on routes that require identity
//! - Rate limit denials never consume the caller's window

pub mod identity;
pub mod rate_limit;

pub use identity::{AuthError, Identity, IdentityValidator, StaticTokenValidator};
pub use rate_limit::{RateLimitDecision, RateLimiter};
