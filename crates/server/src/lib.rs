use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use server_api::ApiContext;
use shared::protocol::RoomNamesPayload;
use tower_http::trace::TraceLayer;

pub mod config;
mod ws;

#[derive(Clone)]
pub struct AppState {
    pub api: ApiContext,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/rooms", get(list_rooms))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_rooms(State(state): State<Arc<AppState>>) -> Json<RoomNamesPayload> {
    Json(RoomNamesPayload {
        room_names: state.api.registry.room_names().await,
    })
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
