use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::time::Instant;

use crate::api::middleware::session::AppState;
use crate::db::DbPool;
use crate::lifecycle::Phase;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub phase: Phase,
    pub timestamp: String,
    pub version: String,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize)]
pub struct DependencyStatus {
    pub database: ServiceHealth,
}

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub status: &'static str,
    pub response_time_ms: u128,
    pub checked_out_connections: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Health check endpoint
/// Returns 200 while the database answers, 503 while serving degraded or shutting down
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = Instant::now();

    let database = check_database(&state.db).await;
    let reachable = database.error.is_none();
    let phase = state.lifecycle.record_database(reachable);

    let status = match phase {
        Phase::ConnectedServing => "healthy",
        Phase::DegradedServing => "degraded",
        Phase::Starting => "starting",
        Phase::ShuttingDown | Phase::Terminated => "shutting_down",
    };
    let status_code = if phase == Phase::ConnectedServing {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status,
        phase,
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dependencies: DependencyStatus { database },
    };

    tracing::info!(
        status = response.status,
        duration_ms = start.elapsed().as_millis() as u64,
        "Health check completed"
    );

    (status_code, Json(response))
}

/// Check database connectivity
async fn check_database(db: &DbPool) -> ServiceHealth {
    let start = Instant::now();

    match db.ping().await {
        Ok(()) => ServiceHealth {
            status: "healthy",
            response_time_ms: start.elapsed().as_millis(),
            checked_out_connections: db.checked_out(),
            error: None,
        },
        Err(e) => ServiceHealth {
            status: "unhealthy",
            response_time_ms: start.elapsed().as_millis(),
            checked_out_connections: db.checked_out(),
            error: Some(e.to_string()),
        },
    }
}
