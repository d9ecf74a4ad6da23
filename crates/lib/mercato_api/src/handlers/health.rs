//! Liveness endpoint.

use axum::Json;

use crate::models::HealthResponse;

/// `GET /health`: process is up and serving.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: mercato_core::version().to_string(),
    })
}
