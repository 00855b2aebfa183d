use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use shared_types::{
    AddStageRequest, AddTaskTemplateRequest, AppError, CreateTemplateRequest, NextVersionRequest,
    SetActiveRequest, TemplateDefinition, TemplateSearchParams, TemplateVersionParams,
    UpdateStageRequest, UpdateTaskTemplateRequest, WorkflowStage, WorkflowTaskTemplate,
    WorkflowTemplate,
};

use super::parse_uuid;
use crate::db::PgEngine;
use crate::error_convert::ValidateRequest;

// ---------------------------------------------------------------------------
// GET /api/workflow-templates
// ---------------------------------------------------------------------------

/// Released, active templates applicable to a practice area and sub-type.
/// With `matter_id`, selection conditions are checked against that matter's
/// attributes.
#[utoipa::path(
    get,
    path = "/api/workflow-templates",
    params(TemplateSearchParams),
    responses(
        (status = 200, description = "Applicable templates, defaults first", body = Vec<WorkflowTemplate>),
        (status = 404, description = "Matter not found", body = AppError)
    ),
    tag = "templates"
)]
pub async fn list_applicable_templates(
    State(engine): State<Arc<PgEngine>>,
    Query(params): Query<TemplateSearchParams>,
) -> Result<Json<Vec<WorkflowTemplate>>, AppError> {
    let sub_type = params.sub_type.as_deref();
    let templates = match params.matter_id {
        Some(matter_id) => {
            engine
                .list_applicable_for_matter(&params.practice_area, sub_type, matter_id)
                .await?
        }
        None => {
            engine
                .list_applicable(&params.practice_area, sub_type, &Default::default())
                .await?
        }
    };
    Ok(Json(templates))
}

// ---------------------------------------------------------------------------
// POST /api/workflow-templates
// ---------------------------------------------------------------------------

/// Draft a new template.
#[utoipa::path(
    post,
    path = "/api/workflow-templates",
    request_body = CreateTemplateRequest,
    responses(
        (status = 201, description = "Template drafted", body = WorkflowTemplate),
        (status = 400, description = "Invalid request", body = AppError),
        (status = 409, description = "Key and version already exist", body = AppError)
    ),
    tag = "templates"
)]
pub async fn create_template(
    State(engine): State<Arc<PgEngine>>,
    Json(payload): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<WorkflowTemplate>), AppError> {
    payload.validate_request()?;
    let template = engine.create_template(payload).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

// ---------------------------------------------------------------------------
// GET /api/workflow-templates/by-key/{key}
// ---------------------------------------------------------------------------

/// A template definition by key, at an exact version or the latest active release.
#[utoipa::path(
    get,
    path = "/api/workflow-templates/by-key/{key}",
    params(
        ("key" = String, Path, description = "Template key"),
        TemplateVersionParams
    ),
    responses(
        (status = 200, description = "Template definition", body = TemplateDefinition),
        (status = 404, description = "Not found", body = AppError)
    ),
    tag = "templates"
)]
pub async fn get_template_by_key(
    State(engine): State<Arc<PgEngine>>,
    Path(key): Path<String>,
    Query(params): Query<TemplateVersionParams>,
) -> Result<Json<TemplateDefinition>, AppError> {
    let definition = engine.get_template(&key, params.version.as_deref()).await?;
    Ok(Json(definition))
}

// ---------------------------------------------------------------------------
// POST /api/workflow-templates/{id}/stages
// ---------------------------------------------------------------------------

/// Add a stage to a draft template.
#[utoipa::path(
    post,
    path = "/api/workflow-templates/{id}/stages",
    params(("id" = String, Path, description = "Template UUID")),
    request_body = AddStageRequest,
    responses(
        (status = 201, description = "Stage added", body = WorkflowStage),
        (status = 404, description = "Template not found", body = AppError),
        (status = 409, description = "Template released or sort order taken", body = AppError)
    ),
    tag = "templates"
)]
pub async fn add_stage(
    State(engine): State<Arc<PgEngine>>,
    Path(id): Path<String>,
    Json(payload): Json<AddStageRequest>,
) -> Result<(StatusCode, Json<WorkflowStage>), AppError> {
    let template_id = parse_uuid(&id, "template")?;
    payload.validate_request()?;
    let stage = engine.add_stage(template_id, payload).await?;
    Ok((StatusCode::CREATED, Json(stage)))
}

// ---------------------------------------------------------------------------
// PATCH /api/workflow-stages/{id}
// ---------------------------------------------------------------------------

/// Edit a stage of a draft template.
#[utoipa::path(
    patch,
    path = "/api/workflow-stages/{id}",
    params(("id" = String, Path, description = "Template stage UUID")),
    request_body = UpdateStageRequest,
    responses(
        (status = 200, description = "Stage updated", body = WorkflowStage),
        (status = 404, description = "Not found", body = AppError),
        (status = 409, description = "Template released", body = AppError)
    ),
    tag = "templates"
)]
pub async fn update_stage(
    State(engine): State<Arc<PgEngine>>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateStageRequest>,
) -> Result<Json<WorkflowStage>, AppError> {
    let stage_id = parse_uuid(&id, "stage")?;
    let stage = engine.update_stage(stage_id, payload).await?;
    Ok(Json(stage))
}

// ---------------------------------------------------------------------------
// POST /api/workflow-stages/{id}/task-templates
// ---------------------------------------------------------------------------

/// Add a task template to a stage of a draft template.
#[utoipa::path(
    post,
    path = "/api/workflow-stages/{id}/task-templates",
    params(("id" = String, Path, description = "Template stage UUID")),
    request_body = AddTaskTemplateRequest,
    responses(
        (status = 201, description = "Task template added", body = WorkflowTaskTemplate),
        (status = 404, description = "Stage not found", body = AppError),
        (status = 409, description = "Template released or sort order taken", body = AppError)
    ),
    tag = "templates"
)]
pub async fn add_task_template(
    State(engine): State<Arc<PgEngine>>,
    Path(id): Path<String>,
    Json(payload): Json<AddTaskTemplateRequest>,
) -> Result<(StatusCode, Json<WorkflowTaskTemplate>), AppError> {
    let stage_id = parse_uuid(&id, "stage")?;
    payload.validate_request()?;
    let task = engine.add_task_template(stage_id, payload).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

// ---------------------------------------------------------------------------
// PATCH /api/workflow-task-templates/{id}
// ---------------------------------------------------------------------------

/// Edit a task template of a draft template.
#[utoipa::path(
    patch,
    path = "/api/workflow-task-templates/{id}",
    params(("id" = String, Path, description = "Task template UUID")),
    request_body = UpdateTaskTemplateRequest,
    responses(
        (status = 200, description = "Task template updated", body = WorkflowTaskTemplate),
        (status = 404, description = "Not found", body = AppError),
        (status = 409, description = "Template released", body = AppError)
    ),
    tag = "templates"
)]
pub async fn update_task_template(
    State(engine): State<Arc<PgEngine>>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateTaskTemplateRequest>,
) -> Result<Json<WorkflowTaskTemplate>, AppError> {
    let task_template_id = parse_uuid(&id, "task template")?;
    let task = engine.update_task_template(task_template_id, payload).await?;
    Ok(Json(task))
}

// ---------------------------------------------------------------------------
// PATCH /api/workflow-templates/{id}/active
// ---------------------------------------------------------------------------

/// Enable or retire a template for new activations.
#[utoipa::path(
    patch,
    path = "/api/workflow-templates/{id}/active",
    params(("id" = String, Path, description = "Template UUID")),
    request_body = SetActiveRequest,
    responses(
        (status = 200, description = "Template updated", body = WorkflowTemplate),
        (status = 404, description = "Not found", body = AppError)
    ),
    tag = "templates"
)]
pub async fn set_template_active(
    State(engine): State<Arc<PgEngine>>,
    Path(id): Path<String>,
    Json(payload): Json<SetActiveRequest>,
) -> Result<Json<WorkflowTemplate>, AppError> {
    let template_id = parse_uuid(&id, "template")?;
    let template = engine.set_active(template_id, payload.is_active).await?;
    Ok(Json(template))
}

// ---------------------------------------------------------------------------
// POST /api/workflow-templates/{id}/release
// ---------------------------------------------------------------------------

/// Validate and release a draft template, freezing its definition.
#[utoipa::path(
    post,
    path = "/api/workflow-templates/{id}/release",
    params(("id" = String, Path, description = "Template UUID")),
    responses(
        (status = 200, description = "Template released", body = WorkflowTemplate),
        (status = 400, description = "Definition incomplete", body = AppError),
        (status = 409, description = "Already released", body = AppError)
    ),
    tag = "templates"
)]
pub async fn release_template(
    State(engine): State<Arc<PgEngine>>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowTemplate>, AppError> {
    let template_id = parse_uuid(&id, "template")?;
    let template = engine.release(template_id).await?;
    Ok(Json(template))
}

// ---------------------------------------------------------------------------
// POST /api/workflow-templates/{id}/versions
// ---------------------------------------------------------------------------

/// Copy a template into a new draft version.
#[utoipa::path(
    post,
    path = "/api/workflow-templates/{id}/versions",
    params(("id" = String, Path, description = "Source template UUID")),
    request_body = NextVersionRequest,
    responses(
        (status = 201, description = "New draft version", body = TemplateDefinition),
        (status = 400, description = "Invalid version", body = AppError),
        (status = 409, description = "Version not higher than existing ones", body = AppError)
    ),
    tag = "templates"
)]
pub async fn create_next_version(
    State(engine): State<Arc<PgEngine>>,
    Path(id): Path<String>,
    Json(payload): Json<NextVersionRequest>,
) -> Result<(StatusCode, Json<TemplateDefinition>), AppError> {
    let template_id = parse_uuid(&id, "template")?;
    payload.validate_request()?;
    let definition = engine
        .create_next_version(template_id, payload.version.trim())
        .await?;
    Ok((StatusCode::CREATED, Json(definition)))
}
