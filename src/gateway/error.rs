//! Errors surfaced to gateway callers.

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

use crate::cache::CacheError;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("no route matches `{path}`")]
    NotFound { path: String },

    #[error("authentication required")]
    Unauthorized,

    #[error("rate limit exceeded, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("service `{service_id}` is unavailable")]
    ServiceUnavailable { service_id: String },

    #[error("service `{service_id}` timed out after {attempts} attempt(s)")]
    UpstreamTimeout { service_id: String, attempts: u32 },

    /// The upstream failed. `status` is the upstream's own status when it
    /// answered at all.
    #[error("service `{service_id}` failed: {message}")]
    UpstreamError {
        service_id: String,
        status: Option<u16>,
        message: String,
        body: Vec<u8>,
    },

    /// Cache backend failure. The pipeline degrades to a cache miss instead
    /// of returning this.
    #[error("cache failure: {0}")]
    Cache(String),
}

impl From<CacheError> for GatewayError {
    fn from(err: CacheError) -> Self {
        GatewayError::Cache(err.to_string())
    }
}

impl GatewayError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::Unauthorized => "unauthorized",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::ServiceUnavailable { .. } => "service_unavailable",
            GatewayError::UpstreamTimeout { .. } => "upstream_timeout",
            GatewayError::UpstreamError { .. } => "upstream_error",
            GatewayError::Cache(_) => "cache_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            // Client errors from the upstream pass through unchanged.
            GatewayError::UpstreamError {
                status: Some(status),
                ..
            } if (400..500).contains(status) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Seconds the caller should wait, for rate-limited requests.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after } => Some(retry_after.as_secs().max(1)),
            _ => None,
        }
    }
}
