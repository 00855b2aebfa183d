pub mod exception;
pub mod stage;
pub mod task;
pub mod template;
pub mod workflow;

use axum::{
    routing::{get, patch, post},
    Router,
};
use shared_types::AppError;
use uuid::Uuid;

use crate::db::AppState;

/// Parse a path segment as a UUID, naming the segment in the error.
pub(crate) fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::bad_request(format!("Invalid {what} UUID format")))
}

/// Build the workflow REST API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        // Template catalog
        .route(
            "/api/workflow-templates",
            get(template::list_applicable_templates).post(template::create_template),
        )
        .route("/api/workflow-templates/by-key/{key}", get(template::get_template_by_key))
        .route("/api/workflow-templates/{id}/stages", post(template::add_stage))
        .route("/api/workflow-templates/{id}/active", patch(template::set_template_active))
        .route("/api/workflow-templates/{id}/release", post(template::release_template))
        .route("/api/workflow-templates/{id}/versions", post(template::create_next_version))
        .route("/api/workflow-stages/{id}", patch(template::update_stage))
        .route("/api/workflow-stages/{id}/task-templates", post(template::add_task_template))
        .route("/api/workflow-task-templates/{id}", patch(template::update_task_template))
        // Matter workflows
        .route(
            "/api/matters/{matter_id}/workflow",
            get(workflow::get_workflow).post(workflow::activate_workflow),
        )
        .route("/api/matters/{matter_id}/workflow/audit", get(workflow::audit_workflow))
        // Stages
        .route("/api/stages/{id}", get(stage::get_stage))
        .route("/api/stages/{id}/tasks", get(stage::list_stage_tasks))
        .route("/api/stages/{id}/evaluate", post(stage::evaluate_stage))
        .route("/api/stages/{id}/force-advance", post(stage::force_advance))
        // Tasks
        .route("/api/tasks", post(task::create_manual_task))
        .route("/api/tasks/{id}/status", patch(task::update_task_status))
        .route("/api/tasks/{id}/approval", post(task::decide_approval))
        .route("/api/tasks/{id}/evidence", post(task::link_evidence))
        // Exception ledger
        .route("/api/exceptions", get(exception::list_exceptions))
}
