//! Admin API.
//!
//! Read-only JSON views of the gateway's runtime state, served on a separate
//! address behind a bearer token.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};

use crate::gateway::Gateway;
use crate::realtime::ConnectionManager;

use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub gateway: Arc<Gateway>,
    pub realtime: Arc<ConnectionManager>,
    pub api_key: Arc<str>,
    pub started_at: Instant,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/metrics", get(get_metrics))
        .route("/admin/cache", get(get_cache))
        .route("/admin/routes", get(get_routes))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/breakers/{service_id}", get(get_breaker))
        .route("/admin/rooms", get(get_rooms))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
