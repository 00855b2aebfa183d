use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use shared_types::{AppError, ForceAdvanceRequest, MatterStage, Task};

use super::parse_uuid;
use crate::db::PgEngine;

/// Get a matter stage by ID.
#[utoipa::path(
    get,
    path = "/api/stages/{id}",
    params(("id" = String, Path, description = "Matter stage UUID")),
    responses(
        (status = 200, description = "Stage found", body = MatterStage),
        (status = 404, description = "Not found", body = AppError)
    ),
    tag = "stages"
)]
pub async fn get_stage(
    State(engine): State<Arc<PgEngine>>,
    Path(id): Path<String>,
) -> Result<Json<MatterStage>, AppError> {
    let stage_id = parse_uuid(&id, "stage")?;
    Ok(Json(engine.get_stage(stage_id).await?))
}

/// Tasks attached to a stage, workflow tasks first.
#[utoipa::path(
    get,
    path = "/api/stages/{id}/tasks",
    params(("id" = String, Path, description = "Matter stage UUID")),
    responses(
        (status = 200, description = "Stage tasks", body = Vec<Task>),
        (status = 404, description = "Not found", body = AppError)
    ),
    tag = "stages"
)]
pub async fn list_stage_tasks(
    State(engine): State<Arc<PgEngine>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Task>>, AppError> {
    let stage_id = parse_uuid(&id, "stage")?;
    Ok(Json(engine.list_tasks(stage_id).await?))
}

/// Recompute a stage from its tasks, completing it and advancing the
/// workflow when its criteria hold.
#[utoipa::path(
    post,
    path = "/api/stages/{id}/evaluate",
    params(("id" = String, Path, description = "Matter stage UUID")),
    responses(
        (status = 200, description = "Stage after evaluation", body = MatterStage),
        (status = 404, description = "Not found", body = AppError),
        (status = 409, description = "Concurrent update", body = AppError)
    ),
    tag = "stages"
)]
pub async fn evaluate_stage(
    State(engine): State<Arc<PgEngine>>,
    Path(id): Path<String>,
) -> Result<Json<MatterStage>, AppError> {
    let stage_id = parse_uuid(&id, "stage")?;
    Ok(Json(engine.evaluate(stage_id).await?))
}

/// Complete an in-progress stage whose criteria are not met. Soft gates need
/// an approved exception; hard gates refuse unless one is supplied.
#[utoipa::path(
    post,
    path = "/api/stages/{id}/force-advance",
    params(("id" = String, Path, description = "Matter stage UUID")),
    request_body = ForceAdvanceRequest,
    responses(
        (status = 200, description = "Stage completed", body = MatterStage),
        (status = 409, description = "Hard gate blocked or stage not in progress", body = AppError),
        (status = 422, description = "Exception missing, blank or not approvable", body = AppError)
    ),
    tag = "stages"
)]
pub async fn force_advance(
    State(engine): State<Arc<PgEngine>>,
    Path(id): Path<String>,
    Json(payload): Json<ForceAdvanceRequest>,
) -> Result<Json<MatterStage>, AppError> {
    let stage_id = parse_uuid(&id, "stage")?;
    Ok(Json(engine.force_advance(stage_id, payload.exception).await?))
}
