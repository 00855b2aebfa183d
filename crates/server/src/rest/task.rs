use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use shared_types::{
    AppError, CreateManualTaskRequest, DecideApprovalRequest, EvidenceItem, LinkEvidenceRequest,
    Task, UpdateTaskStatusRequest,
};

use super::parse_uuid;
use crate::actor::ActorId;
use crate::db::PgEngine;
use crate::error_convert::ValidateRequest;

// ---------------------------------------------------------------------------
// POST /api/tasks
// ---------------------------------------------------------------------------

/// Create an ad-hoc task on a matter. Manual tasks never gate a stage.
#[utoipa::path(
    post,
    path = "/api/tasks",
    request_body = CreateManualTaskRequest,
    responses(
        (status = 201, description = "Task created", body = Task),
        (status = 400, description = "Invalid request", body = AppError),
        (status = 404, description = "Matter has no workflow", body = AppError)
    ),
    tag = "tasks"
)]
pub async fn create_manual_task(
    State(engine): State<Arc<PgEngine>>,
    Json(payload): Json<CreateManualTaskRequest>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    payload.validate_request()?;
    let task = engine
        .create_manual_task(
            payload.matter_id,
            payload.title.trim(),
            payload.matter_stage_id,
            payload.due_at,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

// ---------------------------------------------------------------------------
// PATCH /api/tasks/{id}/status
// ---------------------------------------------------------------------------

/// Move a task to a new status. Skipping or marking not applicable requires
/// an exception; completing requires the task's preconditions.
#[utoipa::path(
    patch,
    path = "/api/tasks/{id}/status",
    params(
        ("id" = String, Path, description = "Task UUID"),
        ("X-User-ID" = i64, Header, description = "Acting user")
    ),
    request_body = UpdateTaskStatusRequest,
    responses(
        (status = 200, description = "Task updated", body = Task),
        (status = 400, description = "Transition not allowed", body = AppError),
        (status = 409, description = "Stage settled or concurrent update", body = AppError),
        (status = 422, description = "Preconditions unmet or exception invalid", body = AppError)
    ),
    tag = "tasks"
)]
pub async fn update_task_status(
    State(engine): State<Arc<PgEngine>>,
    actor: ActorId,
    Path(id): Path<String>,
    Json(payload): Json<UpdateTaskStatusRequest>,
) -> Result<Json<Task>, AppError> {
    let task_id = parse_uuid(&id, "task")?;
    let task = engine
        .update_task_status(task_id, payload.status, actor.0, payload.exception)
        .await?;
    Ok(Json(task))
}

// ---------------------------------------------------------------------------
// POST /api/tasks/{id}/approval
// ---------------------------------------------------------------------------

/// Approve or reject a task that requires approval. The acting user must
/// hold the task's approver role when it names one.
#[utoipa::path(
    post,
    path = "/api/tasks/{id}/approval",
    params(
        ("id" = String, Path, description = "Task UUID"),
        ("X-User-ID" = i64, Header, description = "Approving user")
    ),
    request_body = DecideApprovalRequest,
    responses(
        (status = 200, description = "Decision recorded", body = Task),
        (status = 400, description = "Task does not require approval", body = AppError),
        (status = 403, description = "Approver lacks the required role", body = AppError)
    ),
    tag = "tasks"
)]
pub async fn decide_approval(
    State(engine): State<Arc<PgEngine>>,
    actor: ActorId,
    Path(id): Path<String>,
    Json(payload): Json<DecideApprovalRequest>,
) -> Result<Json<Task>, AppError> {
    let task_id = parse_uuid(&id, "task")?;
    let task = engine.decide_approval(task_id, actor.0, payload.approve).await?;
    Ok(Json(task))
}

// ---------------------------------------------------------------------------
// POST /api/tasks/{id}/evidence
// ---------------------------------------------------------------------------

/// Link an evidence item to a task. Verification happens elsewhere.
#[utoipa::path(
    post,
    path = "/api/tasks/{id}/evidence",
    params(("id" = String, Path, description = "Task UUID")),
    request_body = LinkEvidenceRequest,
    responses(
        (status = 201, description = "Evidence linked", body = EvidenceItem),
        (status = 404, description = "Task not found", body = AppError),
        (status = 409, description = "Task already completed", body = AppError)
    ),
    tag = "tasks"
)]
pub async fn link_evidence(
    State(engine): State<Arc<PgEngine>>,
    Path(id): Path<String>,
    Json(payload): Json<LinkEvidenceRequest>,
) -> Result<(StatusCode, Json<EvidenceItem>), AppError> {
    let task_id = parse_uuid(&id, "task")?;
    payload.validate_request()?;
    let item = engine
        .link_evidence(task_id, payload.evidence_type.trim(), payload.description)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}
