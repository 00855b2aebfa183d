//! Workflow activation and stage entry.
//!
//! Activation pins a released template version to a matter and creates one
//! stage instance per template stage. Tasks are created lazily, only when a
//! stage starts.

use shared_types::{
    AppError, ApprovalStatus, ExceptionObjectType, ExceptionType, MatterStage, MatterWorkflow,
    StageStatus, Task, TaskSource, TaskStatus, TemplateDefinition, WorkflowStatus,
};
use uuid::Uuid;

use super::due_date::{self, AnchorContext};
use super::ledger::{ApprovedException, SYSTEM_SKIP_REASON};
use super::state::{MatterWorkflowState, StepContext};

impl MatterWorkflowState {
    /// Build a new workflow for `cx.matter` from a released template.
    ///
    /// Every stage whose applicability conditions are false against the
    /// matter's attributes is skipped with a system exception; the first
    /// remaining stage starts and gets its tasks. All rows are marked as
    /// changed so the store inserts the whole aggregate.
    pub fn activate(
        definition: TemplateDefinition,
        activated_by: i64,
        cx: &StepContext<'_>,
    ) -> Result<Self, AppError> {
        let template = &definition.template;
        if !template.is_released() {
            return Err(AppError::bad_request(format!(
                "Template {} {} has not been released",
                template.key, template.version
            )));
        }
        if !template.is_active {
            return Err(AppError::bad_request(format!(
                "Template {} {} is not active",
                template.key, template.version
            )));
        }
        if definition.stages.is_empty() {
            return Err(AppError::bad_request("Template has no stages"));
        }

        let workflow = MatterWorkflow {
            id: Uuid::new_v4(),
            matter_id: cx.matter.matter_id,
            workflow_template_id: template.id,
            workflow_version: template.version.clone(),
            status: WorkflowStatus::Active,
            current_stage_id: None,
            activated_at: cx.now,
            activated_by,
            completed_at: None,
        };
        let stages: Vec<MatterStage> = definition
            .stages
            .iter()
            .map(|def| MatterStage {
                id: Uuid::new_v4(),
                matter_workflow_id: workflow.id,
                workflow_stage_id: def.stage.id,
                name: def.stage.name.clone(),
                sort_order: def.stage.sort_order,
                gate_type: def.stage.gate_type,
                completion_criteria: def.stage.completion_criteria,
                status: StageStatus::Pending,
                started_at: None,
                completed_at: None,
                skipped_reason: None,
                exception_id: None,
            })
            .collect();

        let mut state = Self::empty(workflow, definition);
        state.stages = stages;

        for index in 0..state.stages.len() {
            if !state.stage_applies(index, cx) {
                state.skip_stage_by_system(index, cx)?;
            }
        }
        state.advance_from(None, cx)?;
        state.mark_all_changed();

        tracing::info!(
            matter_id = %state.matter_id(),
            template = %state.definition.template.key,
            version = %state.workflow.workflow_version,
            activated_by,
            "workflow activated"
        );
        Ok(state)
    }

    /// Mark a pending stage in progress and instantiate its tasks.
    pub(crate) fn start_stage(&mut self, index: usize, cx: &StepContext<'_>) {
        self.stages[index].started_at = Some(cx.now);
        self.set_stage_status(index, StageStatus::InProgress, cx.now);
        self.instantiate_tasks(index, cx);
    }

    /// Skip a stage whose applicability conditions do not hold, backed by a
    /// system-sourced exception.
    pub(crate) fn skip_stage_by_system(
        &mut self,
        index: usize,
        cx: &StepContext<'_>,
    ) -> Result<(), AppError> {
        let stage_id = self.stages[index].id;
        let exception_id = self.record_exception(
            ExceptionObjectType::Stage,
            stage_id,
            ExceptionType::Skipped,
            &ApprovedException::system(SYSTEM_SKIP_REASON),
            cx.now,
        )?;
        let stage = &mut self.stages[index];
        stage.exception_id = Some(exception_id);
        stage.skipped_reason = Some(SYSTEM_SKIP_REASON.to_string());
        self.set_stage_status(index, StageStatus::Skipped, cx.now);
        Ok(())
    }

    fn instantiate_tasks(&mut self, index: usize, cx: &StepContext<'_>) {
        let stage = &self.stages[index];
        let Some(def) = self.definition.stage(stage.workflow_stage_id) else {
            return;
        };
        let anchors = AnchorContext {
            stage_started_at: stage.started_at,
            task_created_at: Some(cx.now),
            matter_created_at: cx.matter.created_at,
            matter_opened_at: cx.matter.opened_at,
        };
        let tasks: Vec<Task> = def
            .task_templates
            .iter()
            .map(|tt| Task {
                id: Uuid::new_v4(),
                matter_id: self.workflow.matter_id,
                matter_stage_id: Some(stage.id),
                task_template_id: Some(tt.id),
                source: TaskSource::Workflow,
                title: tt.title.clone(),
                status: TaskStatus::Pending,
                is_mandatory: tt.is_mandatory,
                requires_evidence: tt.requires_evidence,
                required_evidence_types: tt.required_evidence_types.clone(),
                requires_verified_evidence: tt.requires_verified_evidence,
                requires_approval: tt.requires_approval,
                required_approver_role: tt.required_approver_role.clone(),
                approval_status: if tt.requires_approval {
                    ApprovalStatus::Pending
                } else {
                    ApprovalStatus::NotRequired
                },
                approved_by_id: None,
                approved_at: None,
                due_date_anchor: tt.due_date_anchor,
                relative_due_days: tt.relative_due_days,
                due_at: due_date::resolve(tt.due_date_anchor, tt.relative_due_days, &anchors),
                exception_id: None,
                completed_by_id: None,
                created_at: cx.now,
                updated_at: cx.now,
                completed_at: None,
            })
            .collect();
        for task in tasks {
            self.push_task(task);
        }
    }
}
