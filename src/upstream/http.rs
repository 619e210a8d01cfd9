//! HTTP upstream client.
//!
//! Forwards requests with the hyper-util legacy client to the base URL
//! configured for each service and classifies the result by status code.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderName, HeaderValue, Request};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use url::Url;

use crate::config::UpstreamConfig;
use crate::upstream::{Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};

/// Largest upstream body the gateway will buffer.
const MAX_RESPONSE_BYTES: usize = 8 * 1024 * 1024;

/// Headers that describe a single hop and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Upstream reached over plain HTTP.
#[derive(Clone)]
pub struct HttpUpstream {
    services: HashMap<String, Url>,
    client: Client<HttpConnector, Body>,
}

impl HttpUpstream {
    pub fn new(configs: &[UpstreamConfig]) -> Self {
        let mut services = HashMap::new();
        for config in configs {
            match Url::parse(&config.base_url) {
                Ok(url) => {
                    services.insert(config.service_id.clone(), url);
                }
                Err(e) => {
                    tracing::warn!(service = %config.service_id, error = %e, "Invalid upstream url");
                }
            }
        }

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { services, client }
    }

    fn target(&self, service_id: &str, request: &UpstreamRequest) -> Result<String, UpstreamError> {
        let base = self
            .services
            .get(service_id)
            .ok_or_else(|| UpstreamError::UnknownService(service_id.to_string()))?;
        let base = base.as_str().trim_end_matches('/');
        Ok(format!("{}{}", base, request.path_and_query()))
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn invoke(
        &self,
        service_id: &str,
        request: &UpstreamRequest,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let uri = self.target(service_id, request)?;

        let mut builder = Request::builder().method(request.method.clone()).uri(&uri);
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in &request.headers {
                if is_hop_by_hop(name) {
                    continue;
                }
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    headers.append(name, value);
                }
            }
            if let Some(id) = &request.request_id {
                if let Ok(value) = HeaderValue::from_str(id) {
                    headers.insert("x-request-id", value);
                }
            }
        }

        let outgoing = builder
            .body(Body::from(request.body.clone()))
            .map_err(|e| UpstreamError::Client {
                status: 400,
                body: e.to_string().into_bytes(),
            })?;

        let response = self
            .client
            .request(outgoing)
            .await
            .map_err(|e| UpstreamError::transient(e.to_string()))?;

        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(Body::new(body), MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| UpstreamError::transient(format!("reading upstream body: {e}")))?
            .to_vec();

        let status = parts.status;
        if status.is_server_error() {
            return Err(UpstreamError::Transient {
                status: Some(status.as_u16()),
                message: format!("upstream returned {status}"),
            });
        }
        if status.is_client_error() {
            return Err(UpstreamError::Client {
                status: status.as_u16(),
                body,
            });
        }

        let headers = parts
            .headers
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()) && *name != header::DATE)
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Ok(UpstreamResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}
