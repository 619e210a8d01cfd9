//! Resilient gateway and real-time layer for a family platform.

pub mod admin;
pub mod cache;
pub mod clock;
pub mod config;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod realtime;
pub mod resilience;
pub mod routing;
pub mod security;
pub mod upstream;

pub use config::GatewayConfig;
pub use gateway::{Gateway, GatewayError, GatewayRequest};
pub use http::HttpServer;
pub use lifecycle::{Services, Shutdown};
pub use realtime::ConnectionManager;
