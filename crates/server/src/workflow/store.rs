use chrono::{DateTime, Utc};
use shared_types::{
    AppError, ExceptionObjectType, MatterStage, Task, TaskException, TemplateDefinition,
    WorkflowEvent, WorkflowStage, WorkflowTaskTemplate, WorkflowTemplate, WorkflowView,
};
use uuid::Uuid;

use super::state::MatterWorkflowState;

/// Result of a committed per-matter mutation, with the events it raised.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed<T> {
    pub value: T,
    pub events: Vec<WorkflowEvent>,
}

// ── Template catalog ─────────────────────────────────────────────────

/// Persistence for versioned workflow templates.
///
/// Writes to a template's stages or task templates must fail with
/// `TemplateImmutable` once the template is released, even if the caller
/// checked beforehand.
#[allow(async_fn_in_trait)]
pub trait TemplateStore: Send + Sync {
    /// Fails with `Conflict` if the key/version pair already exists.
    async fn insert_template(&self, template: &WorkflowTemplate) -> Result<(), AppError>;

    async fn find_template(&self, template_id: Uuid) -> Result<Option<WorkflowTemplate>, AppError>;

    /// Templates filtered by key and/or practice area.
    async fn list_templates(
        &self,
        key: Option<&str>,
        practice_area: Option<&str>,
    ) -> Result<Vec<WorkflowTemplate>, AppError>;

    /// The template with its stages and task templates in sort order.
    async fn load_definition(
        &self,
        template_id: Uuid,
    ) -> Result<Option<TemplateDefinition>, AppError>;

    async fn find_template_stage(&self, stage_id: Uuid) -> Result<Option<WorkflowStage>, AppError>;

    async fn find_task_template(
        &self,
        task_template_id: Uuid,
    ) -> Result<Option<WorkflowTaskTemplate>, AppError>;

    async fn insert_stage(&self, stage: &WorkflowStage) -> Result<(), AppError>;

    async fn update_stage(&self, stage: &WorkflowStage) -> Result<(), AppError>;

    async fn insert_task_template(&self, task: &WorkflowTaskTemplate) -> Result<(), AppError>;

    async fn update_task_template(&self, task: &WorkflowTaskTemplate) -> Result<(), AppError>;

    /// Stamp `released_at`. Fails with `TemplateImmutable` if already released.
    async fn mark_released(
        &self,
        template_id: Uuid,
        released_at: DateTime<Utc>,
    ) -> Result<WorkflowTemplate, AppError>;

    async fn set_active(
        &self,
        template_id: Uuid,
        is_active: bool,
    ) -> Result<WorkflowTemplate, AppError>;

    /// Insert a template together with its whole stage tree, atomically.
    async fn insert_definition(&self, definition: &TemplateDefinition) -> Result<(), AppError>;
}

// ── Matter workflows ─────────────────────────────────────────────────

/// Persistence for matter-bound workflow aggregates.
#[allow(async_fn_in_trait)]
pub trait WorkflowStore: Send + Sync {
    /// Insert a freshly activated workflow. Fails with `DuplicateWorkflow`
    /// if the matter already has one; nothing is written in that case.
    async fn insert_workflow(
        &self,
        state: MatterWorkflowState,
    ) -> Result<Committed<WorkflowView>, AppError>;

    async fn load_workflow(
        &self,
        matter_id: Uuid,
    ) -> Result<Option<MatterWorkflowState>, AppError>;

    async fn matter_for_stage(&self, stage_id: Uuid) -> Result<Option<Uuid>, AppError>;

    async fn matter_for_task(&self, task_id: Uuid) -> Result<Option<Uuid>, AppError>;

    /// Run `apply` against the matter's aggregate while holding the matter's
    /// lock, and persist its changes atomically if it returns `Ok`. An `Err`
    /// from `apply` leaves storage untouched. Lost races surface as
    /// `ConcurrentUpdate`.
    async fn with_matter<T, F>(&self, matter_id: Uuid, apply: F) -> Result<Committed<T>, AppError>
    where
        F: FnOnce(&mut MatterWorkflowState) -> Result<T, AppError> + Send,
        T: Send;

    async fn find_stage(&self, stage_id: Uuid) -> Result<Option<MatterStage>, AppError>;

    async fn list_stage_tasks(&self, stage_id: Uuid) -> Result<Vec<Task>, AppError>;

    async fn find_task(&self, task_id: Uuid) -> Result<Option<Task>, AppError>;

    async fn list_exceptions(
        &self,
        object_type: ExceptionObjectType,
        object_id: Uuid,
    ) -> Result<Vec<TaskException>, AppError>;
}
