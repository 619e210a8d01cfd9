//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Services (gateway, connection manager) → maintenance loop
//!     → admin listener → public listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → close real-time connections → stop accepting
//!     → drain in-flight requests → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{run, Services, StartupError};
