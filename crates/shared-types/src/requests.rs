use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "validation")]
use validator::Validate;

use crate::workflow::{
    CompletionCriteria, ConditionSet, DueDateAnchor, ExceptionObjectType, GateType, TaskStatus,
};

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Template catalog
// ---------------------------------------------------------------------------

/// POST /api/workflow-templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[cfg_attr(feature = "validation", derive(Validate))]
pub struct CreateTemplateRequest {
    #[cfg_attr(
        feature = "validation",
        validate(length(min = 1, message = "Template key is required"))
    )]
    pub key: String,
    #[cfg_attr(
        feature = "validation",
        validate(length(min = 5, message = "Version must look like 1.0.0"))
    )]
    pub version: String,
    #[cfg_attr(
        feature = "validation",
        validate(length(min = 1, message = "Template name is required"))
    )]
    pub name: String,
    #[cfg_attr(
        feature = "validation",
        validate(length(min = 1, message = "Practice area is required"))
    )]
    pub practice_area: String,
    #[serde(default)]
    pub sub_types: Option<Vec<String>>,
    #[serde(default)]
    pub selection_conditions: ConditionSet,
    #[serde(default)]
    pub is_default: bool,
}

/// POST /api/workflow-templates/{id}/stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[cfg_attr(feature = "validation", derive(Validate))]
pub struct AddStageRequest {
    #[cfg_attr(
        feature = "validation",
        validate(length(min = 1, message = "Stage name is required"))
    )]
    pub name: String,
    /// Appended after the last stage when omitted.
    #[serde(default)]
    pub sort_order: Option<i32>,
    pub gate_type: GateType,
    pub completion_criteria: CompletionCriteria,
    #[serde(default)]
    pub applicability_conditions: ConditionSet,
    #[serde(default)]
    pub client_visible: bool,
}

/// PATCH /api/workflow-stages/{id}
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UpdateStageRequest {
    pub name: Option<String>,
    pub gate_type: Option<GateType>,
    pub completion_criteria: Option<CompletionCriteria>,
    pub applicability_conditions: Option<ConditionSet>,
    pub client_visible: Option<bool>,
}

/// POST /api/workflow-stages/{id}/task-templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[cfg_attr(feature = "validation", derive(Validate))]
pub struct AddTaskTemplateRequest {
    #[cfg_attr(
        feature = "validation",
        validate(length(min = 1, message = "Task title is required"))
    )]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i32>,
    #[serde(default = "default_true")]
    pub is_mandatory: bool,
    #[serde(default)]
    pub requires_evidence: bool,
    #[serde(default)]
    pub required_evidence_types: Vec<String>,
    #[serde(default)]
    pub requires_verified_evidence: bool,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub required_approver_role: Option<String>,
    #[serde(default)]
    pub due_date_anchor: Option<DueDateAnchor>,
    #[serde(default)]
    pub relative_due_days: Option<i32>,
}

/// PATCH /api/workflow-task-templates/{id}
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UpdateTaskTemplateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_mandatory: Option<bool>,
    pub requires_evidence: Option<bool>,
    pub required_evidence_types: Option<Vec<String>>,
    pub requires_verified_evidence: Option<bool>,
    pub requires_approval: Option<bool>,
    pub required_approver_role: Option<String>,
    pub due_date_anchor: Option<DueDateAnchor>,
    pub relative_due_days: Option<i32>,
}

/// POST /api/workflow-templates/{id}/versions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[cfg_attr(feature = "validation", derive(Validate))]
pub struct NextVersionRequest {
    #[cfg_attr(
        feature = "validation",
        validate(length(min = 5, message = "Version must look like 1.0.0"))
    )]
    pub version: String,
}

/// PATCH /api/workflow-templates/{id}/active
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SetActiveRequest {
    pub is_active: bool,
}

/// Query for GET /api/workflow-templates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
pub struct TemplateSearchParams {
    pub practice_area: String,
    pub sub_type: Option<String>,
    /// Matter whose attributes feed the selection conditions.
    pub matter_id: Option<Uuid>,
}

/// Query for GET /api/workflow-templates/by-key/{key}
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
pub struct TemplateVersionParams {
    /// Exact version; the latest active release when omitted.
    pub version: Option<String>,
}

// ---------------------------------------------------------------------------
// Matter workflows
// ---------------------------------------------------------------------------

/// POST /api/matters/{matter_id}/workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ActivateWorkflowRequest {
    pub template_id: Uuid,
    pub version: String,
}

/// Reason and approver accompanying a skip, not-applicable or gate override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ExceptionPayload {
    pub reason: String,
    pub approver_id: i64,
}

/// PATCH /api/tasks/{id}/status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct UpdateTaskStatusRequest {
    pub status: TaskStatus,
    #[serde(default)]
    pub exception: Option<ExceptionPayload>,
}

/// POST /api/tasks/{id}/approval
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct DecideApprovalRequest {
    pub approve: bool,
}

/// POST /api/tasks/{id}/evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[cfg_attr(feature = "validation", derive(Validate))]
pub struct LinkEvidenceRequest {
    #[cfg_attr(
        feature = "validation",
        validate(length(min = 1, message = "Evidence type is required"))
    )]
    pub evidence_type: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// POST /api/tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[cfg_attr(feature = "validation", derive(Validate))]
pub struct CreateManualTaskRequest {
    pub matter_id: Uuid,
    #[cfg_attr(
        feature = "validation",
        validate(length(min = 1, message = "Task title is required"))
    )]
    pub title: String,
    #[serde(default)]
    pub matter_stage_id: Option<Uuid>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
}

/// POST /api/stages/{id}/force-advance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ForceAdvanceRequest {
    #[serde(default)]
    pub exception: Option<ExceptionPayload>,
}

/// Query for GET /api/exceptions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
pub struct ExceptionSearchParams {
    pub object_type: ExceptionObjectType,
    pub object_id: Uuid,
}
