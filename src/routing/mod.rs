//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Request path
//!     → router.rs RouteTable (longest matching prefix)
//!     → matcher.rs (segment-boundary prefix test)
//!     → Return: ServiceRoute or no match (404)
//!
//! Request path
//!     → router.rs RuleTable (longest matching endpoint)
//!     → Return: RateLimitRule or no limit
//! ```

pub mod matcher;
pub mod router;

pub use router::{RouteError, RouteTable, RuleTable, ServiceRoute};
