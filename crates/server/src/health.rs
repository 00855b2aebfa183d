use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sqlx::{Pool, Postgres};
use std::sync::OnceLock;
use std::time::Instant;

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Record the application start time. Call once during startup.
pub fn record_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health check response.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub db: String,
    /// Workflows still in progress; absent when the database is unreachable.
    pub active_workflows: Option<i64>,
    pub uptime_seconds: u64,
    pub version: String,
}

/// Health check handler.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(pool): State<Pool<Postgres>>) -> Json<HealthResponse> {
    let active = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM matter_workflows WHERE status = 'active'",
    )
    .fetch_one(&pool)
    .await;

    let (db_status, active_workflows) = match active {
        Ok(count) => ("connected".to_string(), Some(count)),
        Err(e) => {
            tracing::warn!(error = %e, "health check query failed");
            (format!("error: {e}"), None)
        }
    };

    let uptime = START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);

    Json(HealthResponse {
        status: if active_workflows.is_some() { "ok" } else { "degraded" }.to_string(),
        db: db_status,
        active_workflows,
        uptime_seconds: uptime,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
