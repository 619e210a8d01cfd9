//! Upstream invocation.
//!
//! The gateway only cares about the error class of an upstream call:
//! transient failures (transport errors, 5xx, timeouts) are retried and count
//! against the circuit breaker; client errors (4xx) are returned verbatim and
//! never retried.

pub mod http;

use async_trait::async_trait;
use axum::http::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::http::HttpUpstream;

/// Validated identity of the caller, set by the gateway only.
pub const X_IDENTITY_ID: &str = "x-identity-id";
/// Room (family) of the validated caller.
pub const X_ROOM_ID: &str = "x-room-id";

/// True for headers only the gateway may set.
pub fn is_identity_header(name: &str) -> bool {
    name.eq_ignore_ascii_case(X_IDENTITY_ID) || name.eq_ignore_ascii_case(X_ROOM_ID)
}

/// Request forwarded to an upstream service.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub request_id: Option<String>,
}

impl UpstreamRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: None,
            headers: Vec::new(),
            body: Vec::new(),
            request_id: None,
        }
    }

    /// Path plus query string, as sent on the wire.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) if !q.is_empty() => format!("{}?{}", self.path, q),
            _ => self.path.clone(),
        }
    }
}

/// Successful upstream response. Stored as-is in the response cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.into(),
        }
    }
}

/// Classified upstream failure.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// Worth retrying: connection failures, 5xx responses.
    #[error("transient upstream failure: {message}")]
    Transient { status: Option<u16>, message: String },

    /// The upstream rejected the request; retrying will not help.
    #[error("upstream rejected request with status {status}")]
    Client { status: u16, body: Vec<u8> },

    /// No address is configured for the service.
    #[error("no upstream configured for service `{0}`")]
    UnknownService(String),
}

impl UpstreamError {
    pub fn transient(message: impl Into<String>) -> Self {
        UpstreamError::Transient {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Transient { .. })
    }
}

/// The business-logic service behind a route.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn invoke(
        &self,
        service_id: &str,
        request: &UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamError>;
}
