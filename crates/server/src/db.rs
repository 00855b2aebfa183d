use std::sync::Arc;

use axum::extract::FromRef;
use shared_types::{AppError, WorkflowSettings};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

use crate::repo::{PgAttributeProvider, PgRoleChecker, PgWorkflowStore};
use crate::workflow::WorkflowEngine;

/// The engine wired to its Postgres store and collaborators.
pub type PgEngine = WorkflowEngine<PgWorkflowStore, PgAttributeProvider, PgRoleChecker>;

/// Shared application state passed to Axum handlers via `State`.
/// Derives `FromRef` so handlers can extract `State<PgPool>` or
/// `State<Arc<PgEngine>>` directly.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub pool: Pool<Postgres>,
    pub engine: Arc<PgEngine>,
}

impl AppState {
    pub fn new(pool: Pool<Postgres>, settings: WorkflowSettings) -> Self {
        let engine = WorkflowEngine::new(
            PgWorkflowStore::new(pool.clone()),
            PgAttributeProvider::new(pool.clone()),
            PgRoleChecker::new(pool.clone()),
            settings,
        );
        Self {
            pool,
            engine: Arc::new(engine),
        }
    }
}

/// Create a new database connection pool from environment variables.
/// Uses `connect_lazy` so no connections open until the first query.
pub fn create_pool() -> Result<Pool<Postgres>, AppError> {
    // Load .env file if present (ignored in production where env vars are set directly).
    let _ = dotenvy::dotenv();

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| AppError::internal("DATABASE_URL must be set"))?;

    let max_connections: u32 = std::env::var("DATABASE_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);

    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect_lazy(&database_url)
        .map_err(|e| AppError::database(format!("Failed to create database pool: {e}")))
}

/// Run database migrations against the given pool.
pub async fn run_migrations(pool: &Pool<Postgres>) -> Result<(), AppError> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to run database migrations: {e}")))
}
