use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use lapin::{Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::HealthResponse;
use crate::AppState;

/// Liveness probe. Healthy only while the work-queue broker is
/// reachable; the gateway is useless without its event source.
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    debug!("Health check requested");

    match Connection::connect(&state.config.amqp_url(), ConnectionProperties::default()).await {
        Ok(conn) => {
            if let Err(e) = conn.close(200, "health probe done").await {
                warn!("Error closing RabbitMQ probe connection: {}", e);
            }
            (
                StatusCode::OK,
                Json(HealthResponse {
                    status: "healthy".to_string(),
                    rabbitmq: "connected".to_string(),
                }),
            )
        }
        Err(e) => {
            warn!("RabbitMQ unreachable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    rabbitmq: "disconnected".to_string(),
                }),
            )
        }
    }
}
