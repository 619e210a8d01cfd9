//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router: WebSocket endpoint plus a catch-all that hands
//!   every other request to the gateway pipeline
//! - Wire up middleware (request ID, tracing, outer timeout)
//! - Serve with graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    map_response_body::MapResponseBodyLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{GatewayConfig, ListenerConfig};
use crate::gateway::Gateway;
use crate::http::request::into_gateway_request;
use crate::http::response::upstream_response;
use crate::http::websocket::websocket_handler;
use crate::realtime::ConnectionManager;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub realtime: Arc<ConnectionManager>,
    pub listener: Arc<ListenerConfig>,
}

/// Public HTTP/WebSocket server.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &GatewayConfig, gateway: Arc<Gateway>, realtime: Arc<ConnectionManager>) -> Self {
        let state = AppState {
            gateway,
            realtime,
            listener: Arc::new(config.listener.clone()),
        };
        Self {
            router: Self::build_router(config, state),
        }
    }

    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        let mut router = Router::new();
        if config.realtime.enabled {
            router = router.route(&config.realtime.path, get(websocket_handler));
        }

        // Outermost first: the request ID exists before the trace span opens.
        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.listener.request_timeout_secs,
            )))
            .layer(MapResponseBodyLayer::new(Body::new))
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes));

        router
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(middleware)
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let request = match into_gateway_request(
        request,
        peer,
        state.listener.max_body_bytes,
        state.listener.trust_forwarded_for,
    )
    .await
    {
        Ok(request) => request,
        Err(status) => return status.into_response(),
    };

    tracing::debug!(
        request_id = request.request_id.as_deref().unwrap_or("-"),
        method = %request.method,
        path = %request.path,
        "Handling request"
    );

    match state.gateway.handle_request(request).await {
        Ok(response) => upstream_response(response),
        Err(e) => e.into_response(),
    }
}
