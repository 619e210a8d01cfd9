use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::cache::CacheStats;
use crate::observability::MetricsSnapshot;
use crate::realtime::RoomSnapshot;
use crate::resilience::BreakerSnapshot;
use crate::routing::ServiceRoute;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub routes: usize,
    pub connections: usize,
    pub rooms: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: uptime(state.started_at),
        routes: state.gateway.routes().len(),
        connections: state.realtime.connection_count(),
        rooms: state.realtime.room_count(),
    })
}

fn uptime(started_at: Instant) -> u64 {
    started_at.elapsed().as_secs()
}

pub async fn get_metrics(State(state): State<AdminState>) -> Json<MetricsSnapshot> {
    Json(state.gateway.metrics())
}

pub async fn get_cache(State(state): State<AdminState>) -> Json<CacheStats> {
    Json(state.gateway.cache_stats())
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<ServiceRoute>> {
    Json(
        state
            .gateway
            .routes()
            .iter()
            .map(|route| route.as_ref().clone())
            .collect(),
    )
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.gateway.breakers().snapshots())
}

pub async fn get_breaker(
    State(state): State<AdminState>,
    Path(service_id): Path<String>,
) -> Result<Json<BreakerSnapshot>, StatusCode> {
    state
        .gateway
        .breakers()
        .existing_snapshot(&service_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn get_rooms(State(state): State<AdminState>) -> Json<Vec<RoomSnapshot>> {
    Json(state.realtime.rooms())
}
