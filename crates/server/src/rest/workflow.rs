use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use shared_types::{ActivateWorkflowRequest, AppError, InvariantViolation, WorkflowView};

use super::parse_uuid;
use crate::actor::ActorId;
use crate::db::PgEngine;

// ---------------------------------------------------------------------------
// POST /api/matters/{matter_id}/workflow
// ---------------------------------------------------------------------------

/// Pin a released template version to a matter and start its first stage.
#[utoipa::path(
    post,
    path = "/api/matters/{matter_id}/workflow",
    params(
        ("matter_id" = String, Path, description = "Matter UUID"),
        ("X-User-ID" = i64, Header, description = "Acting user")
    ),
    request_body = ActivateWorkflowRequest,
    responses(
        (status = 201, description = "Workflow activated", body = WorkflowView),
        (status = 400, description = "Template not released or version mismatch", body = AppError),
        (status = 404, description = "Matter or template not found", body = AppError),
        (status = 409, description = "Matter already has a workflow", body = AppError)
    ),
    tag = "workflows"
)]
pub async fn activate_workflow(
    State(engine): State<Arc<PgEngine>>,
    actor: ActorId,
    Path(matter_id): Path<String>,
    Json(payload): Json<ActivateWorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowView>), AppError> {
    let matter_id = parse_uuid(&matter_id, "matter")?;
    let view = engine
        .activate(matter_id, payload.template_id, &payload.version, actor.0)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

// ---------------------------------------------------------------------------
// GET /api/matters/{matter_id}/workflow
// ---------------------------------------------------------------------------

/// The matter's workflow with its stages in order.
#[utoipa::path(
    get,
    path = "/api/matters/{matter_id}/workflow",
    params(("matter_id" = String, Path, description = "Matter UUID")),
    responses(
        (status = 200, description = "Workflow found", body = WorkflowView),
        (status = 404, description = "Matter has no workflow", body = AppError)
    ),
    tag = "workflows"
)]
pub async fn get_workflow(
    State(engine): State<Arc<PgEngine>>,
    Path(matter_id): Path<String>,
) -> Result<Json<WorkflowView>, AppError> {
    let matter_id = parse_uuid(&matter_id, "matter")?;
    Ok(Json(engine.get_workflow(matter_id).await?))
}

// ---------------------------------------------------------------------------
// GET /api/matters/{matter_id}/workflow/audit
// ---------------------------------------------------------------------------

/// Reconcile the matter's stage and task states against the exception ledger.
#[utoipa::path(
    get,
    path = "/api/matters/{matter_id}/workflow/audit",
    params(("matter_id" = String, Path, description = "Matter UUID")),
    responses(
        (status = 200, description = "Violations found, empty when consistent", body = Vec<InvariantViolation>),
        (status = 404, description = "Matter has no workflow", body = AppError)
    ),
    tag = "workflows"
)]
pub async fn audit_workflow(
    State(engine): State<Arc<PgEngine>>,
    Path(matter_id): Path<String>,
) -> Result<Json<Vec<InvariantViolation>>, AppError> {
    let matter_id = parse_uuid(&matter_id, "matter")?;
    Ok(Json(engine.audit_invariants(matter_id).await?))
}
