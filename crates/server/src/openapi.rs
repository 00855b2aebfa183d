use axum::Router;
use shared_types::{
    // Errors
    AppError, AppErrorKind,
    // Catalog types
    AddStageRequest, AddTaskTemplateRequest, AttributeValue, CompletionCriteria, ConditionExpr,
    CreateTemplateRequest, DueDateAnchor, GateType, NextVersionRequest, SetActiveRequest,
    StageDefinition, TemplateDefinition, UpdateStageRequest, UpdateTaskTemplateRequest,
    WorkflowStage, WorkflowTaskTemplate, WorkflowTemplate,
    // Matter workflow types
    ActivateWorkflowRequest, ApprovalStatus, CreateManualTaskRequest, DecideApprovalRequest,
    DecisionSource, EvidenceItem, ExceptionObjectType, ExceptionPayload, ExceptionType,
    ForceAdvanceRequest, InvariantViolation, LinkEvidenceRequest, MatterStage, MatterWorkflow,
    MissingPrecondition, StageStatus, Task, TaskException, TaskSource, TaskStatus,
    UpdateTaskStatusRequest, WorkflowStatus, WorkflowView,
};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::db::AppState;
use crate::health::{self, HealthResponse};
use crate::rest;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Matterflow API",
        description = "Workflow templates, stage gating and task lifecycle for legal matters"
    ),
    paths(
        health::health_check,
        // Template catalog
        rest::template::list_applicable_templates,
        rest::template::create_template,
        rest::template::get_template_by_key,
        rest::template::add_stage,
        rest::template::update_stage,
        rest::template::add_task_template,
        rest::template::update_task_template,
        rest::template::set_template_active,
        rest::template::release_template,
        rest::template::create_next_version,
        // Matter workflows
        rest::workflow::activate_workflow,
        rest::workflow::get_workflow,
        rest::workflow::audit_workflow,
        // Stages
        rest::stage::get_stage,
        rest::stage::list_stage_tasks,
        rest::stage::evaluate_stage,
        rest::stage::force_advance,
        // Tasks
        rest::task::create_manual_task,
        rest::task::update_task_status,
        rest::task::decide_approval,
        rest::task::link_evidence,
        // Exception ledger
        rest::exception::list_exceptions,
    ),
    components(schemas(
        HealthResponse, AppError, AppErrorKind,
        AttributeValue, ConditionExpr, GateType, CompletionCriteria, DueDateAnchor,
        WorkflowTemplate, WorkflowStage, WorkflowTaskTemplate, StageDefinition,
        TemplateDefinition, CreateTemplateRequest, AddStageRequest, UpdateStageRequest,
        AddTaskTemplateRequest, UpdateTaskTemplateRequest, NextVersionRequest, SetActiveRequest,
        MatterWorkflow, MatterStage, Task, EvidenceItem, TaskException, WorkflowView,
        InvariantViolation, MissingPrecondition, WorkflowStatus, StageStatus, TaskStatus,
        TaskSource, ApprovalStatus, ExceptionObjectType, ExceptionType, DecisionSource,
        ActivateWorkflowRequest, ExceptionPayload, UpdateTaskStatusRequest,
        DecideApprovalRequest, LinkEvidenceRequest, CreateManualTaskRequest,
        ForceAdvanceRequest,
    )),
    tags(
        (name = "health", description = "Service health"),
        (name = "templates", description = "Versioned workflow template catalog"),
        (name = "workflows", description = "Workflows pinned to matters"),
        (name = "stages", description = "Stage gating and progression"),
        (name = "tasks", description = "Task lifecycle, evidence and approvals"),
        (name = "exceptions", description = "Append-only exception ledger"),
    )
)]
pub struct ApiDoc;

/// Build the REST router with health, the workflow API and the docs UI.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .merge(rest::api_router())
        .route("/health", axum::routing::get(health::health_check))
        .with_state(state)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
}
