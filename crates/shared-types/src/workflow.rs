use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Declares a closed string-valued enum stored as TEXT and exchanged as
/// snake_case JSON, with `as_str`, `Display` and `FromStr`.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:tt ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("invalid {}: {}", stringify!($name), other)),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Discriminants
// ---------------------------------------------------------------------------

text_enum! {
    /// How strictly a stage blocks progression to the next stage.
    pub enum GateType {
        Hard => "hard",
        Soft => "soft",
        None => "none",
    }
}

text_enum! {
    /// Which tasks must be resolved before a stage completes.
    pub enum CompletionCriteria {
        AllMandatoryTasks => "all_mandatory_tasks",
        AllTasks => "all_tasks",
        /// Currently evaluated exactly like `AllMandatoryTasks`.
        Custom => "custom",
    }
}

text_enum! {
    pub enum StageStatus {
        Pending => "pending",
        InProgress => "in_progress",
        Completed => "completed",
        Skipped => "skipped",
    }
}

text_enum! {
    pub enum TaskStatus {
        Pending => "pending",
        InProgress => "in_progress",
        Completed => "completed",
        Skipped => "skipped",
        NotApplicable => "not_applicable",
    }
}

text_enum! {
    pub enum TaskSource {
        Workflow => "workflow",
        Manual => "manual",
    }
}

text_enum! {
    pub enum ApprovalStatus {
        NotRequired => "not_required",
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

text_enum! {
    /// Discriminant of the polymorphic exception target.
    pub enum ExceptionObjectType {
        Task => "task",
        Stage => "stage",
    }
}

text_enum! {
    pub enum ExceptionType {
        Skipped => "skipped",
        NotApplicable => "not_applicable",
        GateOverride => "gate_override",
    }
}

text_enum! {
    pub enum DecisionSource {
        User => "user",
        System => "system",
    }
}

text_enum! {
    /// Event a task's relative due date is counted from.
    pub enum DueDateAnchor {
        StageStarted => "stage_started",
        TaskCreated => "task_created",
        MatterCreated => "matter_created",
        MatterOpened => "matter_opened",
    }
}

text_enum! {
    pub enum WorkflowStatus {
        Active => "active",
        Completed => "completed",
    }
}

text_enum! {
    pub enum WorkflowEventKind {
        StageTransition => "stage_transition",
        WorkflowCompleted => "workflow_completed",
    }
}

text_enum! {
    /// Value type of a matter attribute.
    pub enum AttributeKind {
        Bool => "bool",
        Text => "text",
        Number => "number",
    }
}

impl TaskStatus {
    /// Statuses that can only be entered with an exception record.
    pub fn requires_exception(&self) -> bool {
        matches!(self, TaskStatus::Skipped | TaskStatus::NotApplicable)
    }

    /// The exception type that justifies entering this status, if any.
    pub fn exception_type(&self) -> Option<ExceptionType> {
        match self {
            TaskStatus::Skipped => Some(ExceptionType::Skipped),
            TaskStatus::NotApplicable => Some(ExceptionType::NotApplicable),
            _ => None,
        }
    }
}

impl StageStatus {
    /// Completed or skipped stages never change status again.
    pub fn is_settled(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Skipped)
    }
}

// ---------------------------------------------------------------------------
// Matter attributes and conditions
// ---------------------------------------------------------------------------

/// A typed matter attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::Bool(_) => AttributeKind::Bool,
            AttributeValue::Number(_) => AttributeKind::Number,
            AttributeValue::Text(_) => AttributeKind::Text,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Number(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Text(v.to_string())
    }
}

pub type MatterAttributes = BTreeMap<String, AttributeValue>;

/// Expected value for one attribute in an applicability or selection condition.
///
/// A bare scalar means equality; the object forms are `{"in": [..]}`,
/// `{"not": v}`, `{"gt": n}`, `{"lt": n}` and `{"exists": bool}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(untagged)]
pub enum ConditionExpr {
    Equals(AttributeValue),
    OneOf {
        #[serde(rename = "in")]
        one_of: Vec<AttributeValue>,
    },
    Not {
        not: AttributeValue,
    },
    GreaterThan {
        gt: f64,
    },
    LessThan {
        lt: f64,
    },
    Exists {
        exists: bool,
    },
}

/// Attribute key to expected value; every entry must hold.
pub type ConditionSet = BTreeMap<String, ConditionExpr>;

/// What the matter collaborator knows about a matter at the time of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MatterContext {
    pub matter_id: Uuid,
    pub created_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: MatterAttributes,
}

impl MatterContext {
    pub fn new(matter_id: Uuid) -> Self {
        Self {
            matter_id,
            created_at: None,
            opened_at: None,
            attributes: MatterAttributes::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Template catalog
// ---------------------------------------------------------------------------

/// A versioned workflow definition. Immutable once `released_at` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WorkflowTemplate {
    pub id: Uuid,
    pub key: String,
    pub version: String,
    pub name: String,
    pub practice_area: String,
    /// `None` applies to every sub-type of the practice area.
    pub sub_types: Option<Vec<String>>,
    #[serde(default)]
    pub selection_conditions: ConditionSet,
    pub is_default: bool,
    pub is_active: bool,
    pub released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowTemplate {
    pub fn is_released(&self) -> bool {
        self.released_at.is_some()
    }

    pub fn applies_to_sub_type(&self, sub_type: Option<&str>) -> bool {
        match (&self.sub_types, sub_type) {
            (None, _) => true,
            (Some(list), Some(wanted)) => list.iter().any(|s| s == wanted),
            (Some(_), None) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WorkflowStage {
    pub id: Uuid,
    pub template_id: Uuid,
    pub name: String,
    /// 1-based, strictly increasing and gapless within a template.
    pub sort_order: i32,
    pub gate_type: GateType,
    pub completion_criteria: CompletionCriteria,
    #[serde(default)]
    pub applicability_conditions: ConditionSet,
    pub client_visible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WorkflowTaskTemplate {
    pub id: Uuid,
    pub stage_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub sort_order: i32,
    pub is_mandatory: bool,
    pub requires_evidence: bool,
    #[serde(default)]
    pub required_evidence_types: Vec<String>,
    pub requires_verified_evidence: bool,
    pub requires_approval: bool,
    pub required_approver_role: Option<String>,
    pub due_date_anchor: Option<DueDateAnchor>,
    pub relative_due_days: Option<i32>,
}

/// A stage together with its task templates, ordered by `sort_order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct StageDefinition {
    pub stage: WorkflowStage,
    pub task_templates: Vec<WorkflowTaskTemplate>,
}

/// A template with its full stage tree, ordered by stage `sort_order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TemplateDefinition {
    pub template: WorkflowTemplate,
    pub stages: Vec<StageDefinition>,
}

impl TemplateDefinition {
    pub fn stage(&self, stage_id: Uuid) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.stage.id == stage_id)
    }

    /// Restore `sort_order` ordering of stages and their task templates.
    pub fn sort(&mut self) {
        self.stages.sort_by_key(|s| s.stage.sort_order);
        for stage in &mut self.stages {
            stage.task_templates.sort_by_key(|t| t.sort_order);
        }
    }
}

// ---------------------------------------------------------------------------
// Matter-bound instances
// ---------------------------------------------------------------------------

/// The workflow instance pinned to one matter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MatterWorkflow {
    pub id: Uuid,
    pub matter_id: Uuid,
    pub workflow_template_id: Uuid,
    pub workflow_version: String,
    pub status: WorkflowStatus,
    /// Cached pointer to the in-progress stage; always derivable from stage statuses.
    pub current_stage_id: Option<Uuid>,
    pub activated_at: DateTime<Utc>,
    pub activated_by: i64,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct MatterStage {
    pub id: Uuid,
    pub matter_workflow_id: Uuid,
    pub workflow_stage_id: Uuid,
    pub name: String,
    pub sort_order: i32,
    pub gate_type: GateType,
    pub completion_criteria: CompletionCriteria,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub skipped_reason: Option<String>,
    /// Active skip or gate-override exception for this stage.
    pub exception_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Task {
    pub id: Uuid,
    pub matter_id: Uuid,
    /// `None` only for manual tasks, which never gate anything.
    pub matter_stage_id: Option<Uuid>,
    pub task_template_id: Option<Uuid>,
    pub source: TaskSource,
    pub title: String,
    pub status: TaskStatus,
    pub is_mandatory: bool,
    pub requires_evidence: bool,
    pub required_evidence_types: Vec<String>,
    pub requires_verified_evidence: bool,
    pub requires_approval: bool,
    pub required_approver_role: Option<String>,
    pub approval_status: ApprovalStatus,
    pub approved_by_id: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub due_date_anchor: Option<DueDateAnchor>,
    pub relative_due_days: Option<i32>,
    /// `None` with an anchor set means the due date is not yet determinable.
    pub due_at: Option<DateTime<Utc>>,
    /// Active skip/not-applicable exception for this task.
    pub exception_id: Option<Uuid>,
    pub completed_by_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Workflow-sourced tasks attached to a stage are the only ones that gate.
    pub fn gates_stage(&self, stage_id: Uuid) -> bool {
        self.source == TaskSource::Workflow && self.matter_stage_id == Some(stage_id)
    }
}

/// Evidence linked to a task by identifier; verification happens elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EvidenceItem {
    pub id: Uuid,
    pub task_id: Uuid,
    pub evidence_type: String,
    pub description: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verified_by_id: Option<i64>,
    pub verification_method: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Immutable audit record justifying a skip, a not-applicable marking or a
/// forced gate progression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TaskException {
    pub id: Uuid,
    pub matter_id: Uuid,
    pub object_type: ExceptionObjectType,
    pub object_id: Uuid,
    pub exception_type: ExceptionType,
    pub reason: String,
    pub decision_source: DecisionSource,
    pub approved_by_id: Option<i64>,
    pub approved_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Gate diagnostics, events and projections
// ---------------------------------------------------------------------------

/// A completion precondition a task has not met yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MissingPrecondition {
    Evidence,
    EvidenceTypes { missing: Vec<String> },
    VerifiedEvidence,
    Approval { status: ApprovalStatus },
}

impl MissingPrecondition {
    pub fn key(&self) -> &'static str {
        match self {
            MissingPrecondition::Evidence => "evidence",
            MissingPrecondition::EvidenceTypes { .. } => "evidence_types",
            MissingPrecondition::VerifiedEvidence => "verified_evidence",
            MissingPrecondition::Approval { .. } => "approval",
        }
    }

    pub fn message(&self) -> String {
        match self {
            MissingPrecondition::Evidence => "at least one evidence item must be linked".to_string(),
            MissingPrecondition::EvidenceTypes { missing } => {
                format!("missing evidence of type: {}", missing.join(", "))
            }
            MissingPrecondition::VerifiedEvidence => {
                "at least one linked evidence item must be verified".to_string()
            }
            MissingPrecondition::Approval { status } => {
                format!("approval is required (current status: {status})")
            }
        }
    }

    /// Field-error map used by `AppError::gate_unsatisfied`.
    pub fn to_field_errors(missing: &[MissingPrecondition]) -> HashMap<String, String> {
        missing
            .iter()
            .map(|m| (m.key().to_string(), m.message()))
            .collect()
    }
}

/// Domain event emitted after a stage or workflow transition commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WorkflowEvent {
    pub matter_id: Uuid,
    pub stage_id: Option<Uuid>,
    pub kind: WorkflowEventKind,
    pub from_status: String,
    pub to_status: String,
    pub occurred_at: DateTime<Utc>,
}

/// Workflow with its stages in `sort_order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WorkflowView {
    pub workflow: MatterWorkflow,
    pub stages: Vec<MatterStage>,
}

/// A broken ledger or cache invariant found by the reconciliation audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct InvariantViolation {
    pub object_type: ExceptionObjectType,
    pub object_id: Uuid,
    pub description: String,
}
