//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, timeout)
//!     → request.rs (credential, client IP, buffered body)
//!     → gateway pipeline
//!     → response.rs (upstream response or typed error)
//!
//! WebSocket upgrade on the real-time path
//!     → websocket.rs (handshake, reader loop, writer task)
//! ```

pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
