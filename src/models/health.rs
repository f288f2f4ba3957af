use serde::{Deserialize, Serialize};

/// API response for the liveness probe
#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub rabbitmq: String,
}
