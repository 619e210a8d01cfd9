//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (aggregated counters + metrics facade)
//!
//! Consumers:
//!     → stdout log stream
//!     → admin API snapshots
//!     → Prometheus scrape endpoint
//! ```

pub mod logging;
pub mod metrics;

pub use metrics::{MetricsAggregator, MetricsSnapshot, Outcome};
