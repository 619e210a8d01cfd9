//! Translating HTTP requests into gateway requests.
//!
//! # Responsibilities
//! - Pull the bearer credential out of `Authorization`
//! - Determine the client IP (peer address, or `X-Forwarded-For` when trusted)
//! - Buffer the body up to the configured limit
//! - Carry the request ID set by the request-id layer

use std::net::{IpAddr, SocketAddr};

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};

use crate::gateway::GatewayRequest;
use crate::security::identity::bearer_token;
use crate::upstream::http::is_hop_by_hop;

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Client address for rate limiting.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for {
        let forwarded = headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
    }
    peer.ip()
}

pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Buffer `request` into a [`GatewayRequest`].
pub async fn into_gateway_request(
    request: Request<Body>,
    peer: SocketAddr,
    max_body_bytes: usize,
    trust_forwarded_for: bool,
) -> Result<GatewayRequest, StatusCode> {
    let (parts, body) = request.into_parts();

    let body = axum::body::to_bytes(body, max_body_bytes)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;

    let headers = parts
        .headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()) && *name != header::AUTHORIZATION)
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    Ok(GatewayRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        credential: bearer_token(&parts.headers),
        client_ip: Some(client_ip(&parts.headers, peer, trust_forwarded_for)),
        headers,
        body: body.to_vec(),
        request_id: request_id(&parts.headers),
    })
}
