//! Row shapes for the workflow tables and their conversion into domain types.
//!
//! Enum columns are stored as TEXT and parsed on the way out; a value the
//! domain does not know is reported as an internal error.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use shared_types::{
    AppError, AttributeValue, ConditionSet, EvidenceItem, MatterStage, MatterWorkflow, Task,
    TaskException, WorkflowStage, WorkflowTaskTemplate, WorkflowTemplate,
};
use sqlx::types::Json;
use uuid::Uuid;

fn parse_column<T>(column: &str, raw: &str) -> Result<T, AppError>
where
    T: FromStr<Err = String>,
{
    raw.parse::<T>()
        .map_err(|e| AppError::internal(format!("corrupt {column} column: {e}")))
}

fn parse_optional<T>(column: &str, raw: Option<&str>) -> Result<Option<T>, AppError>
where
    T: FromStr<Err = String>,
{
    raw.map(|r| parse_column(column, r)).transpose()
}

// ── Catalog rows ─────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub struct TemplateRow {
    pub id: Uuid,
    pub key: String,
    pub version: String,
    pub name: String,
    pub practice_area: String,
    pub sub_types: Option<Vec<String>>,
    pub selection_conditions: Json<ConditionSet>,
    pub is_default: bool,
    pub is_active: bool,
    pub released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<TemplateRow> for WorkflowTemplate {
    fn from(r: TemplateRow) -> Self {
        Self {
            id: r.id,
            key: r.key,
            version: r.version,
            name: r.name,
            practice_area: r.practice_area,
            sub_types: r.sub_types,
            selection_conditions: r.selection_conditions.0,
            is_default: r.is_default,
            is_active: r.is_active,
            released_at: r.released_at,
            created_at: r.created_at,
        }
    }
}

pub const TEMPLATE_COLUMNS: &str = "id, key, version, name, practice_area, sub_types, \
     selection_conditions, is_default, is_active, released_at, created_at";

#[derive(Debug, sqlx::FromRow)]
pub struct StageRow {
    pub id: Uuid,
    pub template_id: Uuid,
    pub name: String,
    pub sort_order: i32,
    pub gate_type: String,
    pub completion_criteria: String,
    pub applicability_conditions: Json<ConditionSet>,
    pub client_visible: bool,
}

impl TryFrom<StageRow> for WorkflowStage {
    type Error = AppError;

    fn try_from(r: StageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            template_id: r.template_id,
            name: r.name,
            sort_order: r.sort_order,
            gate_type: parse_column("gate_type", &r.gate_type)?,
            completion_criteria: parse_column("completion_criteria", &r.completion_criteria)?,
            applicability_conditions: r.applicability_conditions.0,
            client_visible: r.client_visible,
        })
    }
}

pub const STAGE_COLUMNS: &str = "id, template_id, name, sort_order, gate_type, \
     completion_criteria, applicability_conditions, client_visible";

#[derive(Debug, sqlx::FromRow)]
pub struct TaskTemplateRow {
    pub id: Uuid,
    pub stage_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub sort_order: i32,
    pub is_mandatory: bool,
    pub requires_evidence: bool,
    pub required_evidence_types: Vec<String>,
    pub requires_verified_evidence: bool,
    pub requires_approval: bool,
    pub required_approver_role: Option<String>,
    pub due_date_anchor: Option<String>,
    pub relative_due_days: Option<i32>,
}

impl TryFrom<TaskTemplateRow> for WorkflowTaskTemplate {
    type Error = AppError;

    fn try_from(r: TaskTemplateRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            stage_id: r.stage_id,
            title: r.title,
            description: r.description,
            sort_order: r.sort_order,
            is_mandatory: r.is_mandatory,
            requires_evidence: r.requires_evidence,
            required_evidence_types: r.required_evidence_types,
            requires_verified_evidence: r.requires_verified_evidence,
            requires_approval: r.requires_approval,
            required_approver_role: r.required_approver_role,
            due_date_anchor: parse_optional("due_date_anchor", r.due_date_anchor.as_deref())?,
            relative_due_days: r.relative_due_days,
        })
    }
}

pub const TASK_TEMPLATE_COLUMNS: &str = "id, stage_id, title, description, sort_order, \
     is_mandatory, requires_evidence, required_evidence_types, requires_verified_evidence, \
     requires_approval, required_approver_role, due_date_anchor, relative_due_days";

// ── Matter rows ──────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub matter_id: Uuid,
    pub workflow_template_id: Uuid,
    pub workflow_version: String,
    pub status: String,
    pub current_stage_id: Option<Uuid>,
    pub activated_at: DateTime<Utc>,
    pub activated_by: i64,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<WorkflowRow> for MatterWorkflow {
    type Error = AppError;

    fn try_from(r: WorkflowRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            matter_id: r.matter_id,
            workflow_template_id: r.workflow_template_id,
            workflow_version: r.workflow_version,
            status: parse_column("status", &r.status)?,
            current_stage_id: r.current_stage_id,
            activated_at: r.activated_at,
            activated_by: r.activated_by,
            completed_at: r.completed_at,
        })
    }
}

pub const WORKFLOW_COLUMNS: &str = "id, matter_id, workflow_template_id, workflow_version, \
     status, current_stage_id, activated_at, activated_by, completed_at";

#[derive(Debug, sqlx::FromRow)]
pub struct MatterStageRow {
    pub id: Uuid,
    pub matter_workflow_id: Uuid,
    pub workflow_stage_id: Uuid,
    pub name: String,
    pub sort_order: i32,
    pub gate_type: String,
    pub completion_criteria: String,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub skipped_reason: Option<String>,
    pub exception_id: Option<Uuid>,
}

impl TryFrom<MatterStageRow> for MatterStage {
    type Error = AppError;

    fn try_from(r: MatterStageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            matter_workflow_id: r.matter_workflow_id,
            workflow_stage_id: r.workflow_stage_id,
            name: r.name,
            sort_order: r.sort_order,
            gate_type: parse_column("gate_type", &r.gate_type)?,
            completion_criteria: parse_column("completion_criteria", &r.completion_criteria)?,
            status: parse_column("status", &r.status)?,
            started_at: r.started_at,
            completed_at: r.completed_at,
            skipped_reason: r.skipped_reason,
            exception_id: r.exception_id,
        })
    }
}

pub const MATTER_STAGE_COLUMNS: &str = "id, matter_workflow_id, workflow_stage_id, name, \
     sort_order, gate_type, completion_criteria, status, started_at, completed_at, \
     skipped_reason, exception_id";

#[derive(Debug, sqlx::FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub matter_id: Uuid,
    pub matter_stage_id: Option<Uuid>,
    pub task_template_id: Option<Uuid>,
    pub source: String,
    pub title: String,
    pub status: String,
    pub is_mandatory: bool,
    pub requires_evidence: bool,
    pub required_evidence_types: Vec<String>,
    pub requires_verified_evidence: bool,
    pub requires_approval: bool,
    pub required_approver_role: Option<String>,
    pub approval_status: String,
    pub approved_by_id: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub due_date_anchor: Option<String>,
    pub relative_due_days: Option<i32>,
    pub due_at: Option<DateTime<Utc>>,
    pub exception_id: Option<Uuid>,
    pub completed_by_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = AppError;

    fn try_from(r: TaskRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            matter_id: r.matter_id,
            matter_stage_id: r.matter_stage_id,
            task_template_id: r.task_template_id,
            source: parse_column("source", &r.source)?,
            title: r.title,
            status: parse_column("status", &r.status)?,
            is_mandatory: r.is_mandatory,
            requires_evidence: r.requires_evidence,
            required_evidence_types: r.required_evidence_types,
            requires_verified_evidence: r.requires_verified_evidence,
            requires_approval: r.requires_approval,
            required_approver_role: r.required_approver_role,
            approval_status: parse_column("approval_status", &r.approval_status)?,
            approved_by_id: r.approved_by_id,
            approved_at: r.approved_at,
            due_date_anchor: parse_optional("due_date_anchor", r.due_date_anchor.as_deref())?,
            relative_due_days: r.relative_due_days,
            due_at: r.due_at,
            exception_id: r.exception_id,
            completed_by_id: r.completed_by_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
            completed_at: r.completed_at,
        })
    }
}

pub const TASK_COLUMNS: &str = "id, matter_id, matter_stage_id, task_template_id, source, \
     title, status, is_mandatory, requires_evidence, required_evidence_types, \
     requires_verified_evidence, requires_approval, required_approver_role, approval_status, \
     approved_by_id, approved_at, due_date_anchor, relative_due_days, due_at, exception_id, \
     completed_by_id, created_at, updated_at, completed_at";

#[derive(Debug, sqlx::FromRow)]
pub struct EvidenceRow {
    pub id: Uuid,
    pub task_id: Uuid,
    pub evidence_type: String,
    pub description: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verified_by_id: Option<i64>,
    pub verification_method: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<EvidenceRow> for EvidenceItem {
    fn from(r: EvidenceRow) -> Self {
        Self {
            id: r.id,
            task_id: r.task_id,
            evidence_type: r.evidence_type,
            description: r.description,
            verified_at: r.verified_at,
            verified_by_id: r.verified_by_id,
            verification_method: r.verification_method,
            created_at: r.created_at,
        }
    }
}

pub const EVIDENCE_COLUMNS: &str = "id, task_id, evidence_type, description, verified_at, \
     verified_by_id, verification_method, created_at";

#[derive(Debug, sqlx::FromRow)]
pub struct ExceptionRow {
    pub id: Uuid,
    pub matter_id: Uuid,
    pub object_type: String,
    pub object_id: Uuid,
    pub exception_type: String,
    pub reason: String,
    pub decision_source: String,
    pub approved_by_id: Option<i64>,
    pub approved_at: DateTime<Utc>,
}

impl TryFrom<ExceptionRow> for TaskException {
    type Error = AppError;

    fn try_from(r: ExceptionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            matter_id: r.matter_id,
            object_type: parse_column("object_type", &r.object_type)?,
            object_id: r.object_id,
            exception_type: parse_column("exception_type", &r.exception_type)?,
            reason: r.reason,
            decision_source: parse_column("decision_source", &r.decision_source)?,
            approved_by_id: r.approved_by_id,
            approved_at: r.approved_at,
        })
    }
}

pub const EXCEPTION_COLUMNS: &str = "id, matter_id, object_type, object_id, exception_type, \
     reason, decision_source, approved_by_id, approved_at";

// ── Collaborator rows ────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub struct AttributeRow {
    pub key: String,
    pub value: Json<serde_json::Value>,
}

impl AttributeRow {
    /// `None` when the stored JSON is not a bool, number or string.
    pub fn into_pair(self) -> Option<(String, AttributeValue)> {
        match serde_json::from_value::<AttributeValue>(self.value.0) {
            Ok(value) => Some((self.key, value)),
            Err(_) => None,
        }
    }
}

/// Convert a batch of rows, failing on the first corrupt one.
pub fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, AppError>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}
