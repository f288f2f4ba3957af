use crate::{handlers::health_check, ws::handshake::ws_handler, AppState};
use axum::{routing::get, Router};
use std::sync::Arc;

/// Create the gateway's routes: the upgrade endpoint and the liveness probe
pub fn create_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_check))
        .with_state(state)
}
