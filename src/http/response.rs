//! Turning gateway results into HTTP responses.
//!
//! # Design Decisions
//! - Errors are JSON `{"error": code, "message": text, "retry_after"?: secs}`
//! - 429 carries `Retry-After` in whole seconds
//! - Upstream 4xx bodies pass through untouched

use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::gateway::GatewayError;
use crate::upstream::UpstreamResponse;

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();

        if let GatewayError::UpstreamError {
            status: Some(upstream_status),
            body,
            ..
        } = &self
        {
            if (400..500).contains(upstream_status) && !body.is_empty() {
                return (status, body.clone()).into_response();
            }
        }

        let retry_after = self.retry_after_secs();
        let mut body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        if let Some(secs) = retry_after {
            body["retry_after"] = json!(secs);
        }
        let mut response = (status, Json(body)).into_response();

        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Rebuild an upstream (or cached) response for the client.
pub fn upstream_response(upstream: UpstreamResponse) -> Response {
    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in upstream.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.append(name, value);
        }
    }
    response
}
