//! Stage gate evaluator
//!
//! A stage's status is derived from its workflow tasks: once every task the
//! completion criteria count is resolved, an in-progress stage completes and
//! the next applicable stage starts. Gate types only matter when a caller
//! tries to force progression before that point.

use shared_types::{
    AppError, CompletionCriteria, ExceptionObjectType, ExceptionType, GateType, MatterStage,
    StageStatus, Task, TaskStatus, WorkflowEvent, WorkflowEventKind, WorkflowStatus,
};
use uuid::Uuid;

use super::conditions::is_applicable;
use super::due_date::{self, AnchorContext};
use super::ledger::ApprovedException;
use super::state::{MatterWorkflowState, StepContext};

/// How many of the tasks a stage's completion criteria count are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateProgress {
    pub resolved: usize,
    pub required: usize,
}

impl GateProgress {
    pub fn is_met(&self) -> bool {
        self.resolved == self.required
    }
}

impl MatterWorkflowState {
    /// Completed, or skipped/not-applicable with a recorded exception.
    pub fn is_resolved(&self, task: &Task) -> bool {
        match task.status {
            TaskStatus::Completed => true,
            TaskStatus::Skipped | TaskStatus::NotApplicable => task
                .exception_id
                .and_then(|id| self.exception(id))
                .is_some_and(|e| e.object_id == task.id),
            TaskStatus::Pending | TaskStatus::InProgress => false,
        }
    }

    pub fn gate_progress(&self, stage: &MatterStage) -> GateProgress {
        let mandatory_only = match stage.completion_criteria {
            CompletionCriteria::AllMandatoryTasks => true,
            CompletionCriteria::AllTasks => false,
            CompletionCriteria::Custom => {
                tracing::warn!(
                    stage = %stage.name,
                    "custom completion criteria has no strategy; using all_mandatory_tasks"
                );
                true
            }
        };
        let counted: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|t| t.gates_stage(stage.id))
            .filter(|t| !mandatory_only || t.is_mandatory)
            .collect();
        GateProgress {
            resolved: counted.iter().filter(|t| self.is_resolved(t)).count(),
            required: counted.len(),
        }
    }

    /// Recompute one stage. An in-progress stage whose criteria are met
    /// completes and the workflow advances; any other stage is left as is.
    pub fn evaluate_stage(
        &mut self,
        stage_id: Uuid,
        cx: &StepContext<'_>,
    ) -> Result<MatterStage, AppError> {
        let index = self.stage_index(stage_id)?;
        self.resolve_deferred_due_dates(index, cx);

        if self.stages[index].status == StageStatus::InProgress {
            let progress = self.gate_progress(&self.stages[index]);
            if progress.is_met() {
                self.complete_stage(index, cx)?;
            } else {
                tracing::debug!(
                    stage = %self.stages[index].name,
                    resolved = progress.resolved,
                    required = progress.required,
                    "stage gate not yet satisfied"
                );
            }
        }
        Ok(self.stages[index].clone())
    }

    /// Progress a stage before its criteria are met. Hard gates need a
    /// gate-override exception, soft gates need one as acknowledgement, and
    /// `none` gates never block.
    pub fn force_advance(
        &mut self,
        stage_id: Uuid,
        exception: Option<&ApprovedException>,
        cx: &StepContext<'_>,
    ) -> Result<MatterStage, AppError> {
        let index = self.stage_index(stage_id)?;
        let stage = &self.stages[index];
        if stage.status != StageStatus::InProgress {
            return Err(AppError::conflict(format!(
                "Stage '{}' is {} and cannot be advanced",
                stage.name, stage.status
            )));
        }

        if self.gate_progress(stage).is_met() {
            return self.evaluate_stage(stage_id, cx);
        }

        let exception = match (stage.gate_type, exception) {
            (_, Some(exception)) => Some(exception),
            (GateType::None, None) => None,
            (GateType::Soft, None) => {
                return Err(AppError::invalid_exception(format!(
                    "Stage '{}' is soft-gated; advancing early must be acknowledged with an exception",
                    stage.name
                )));
            }
            (GateType::Hard, None) => {
                return Err(AppError::gate_blocked(format!(
                    "Stage '{}' is hard-gated; a gate_override exception is required",
                    stage.name
                )));
            }
        };

        if let Some(exception) = exception {
            let exception_id = self.record_exception(
                ExceptionObjectType::Stage,
                stage_id,
                ExceptionType::GateOverride,
                exception,
                cx.now,
            )?;
            self.stages[index].exception_id = Some(exception_id);
            self.touch_stage(index);
        }
        tracing::info!(
            matter_id = %self.matter_id(),
            stage = %self.stages[index].name,
            gate_type = %self.stages[index].gate_type,
            "stage advanced before its completion criteria were met"
        );
        self.complete_stage(index, cx)?;
        Ok(self.stages[index].clone())
    }

    fn complete_stage(&mut self, index: usize, cx: &StepContext<'_>) -> Result<(), AppError> {
        self.stages[index].completed_at = Some(cx.now);
        self.set_stage_status(index, StageStatus::Completed, cx.now);
        self.advance_from(Some(index), cx)
    }

    /// Start the first pending stage after `after` whose applicability
    /// conditions hold against the current attributes, skipping the rest
    /// with a system exception. Completes the workflow when none is left.
    pub(crate) fn advance_from(
        &mut self,
        after: Option<usize>,
        cx: &StepContext<'_>,
    ) -> Result<(), AppError> {
        let start = after.map_or(0, |i| i + 1);
        for index in start..self.stages.len() {
            if self.stages[index].status != StageStatus::Pending {
                continue;
            }
            if self.stage_applies(index, cx) {
                self.start_stage(index, cx);
                let stage_id = self.stages[index].id;
                // A stage with nothing to gate on completes straight away.
                self.evaluate_stage(stage_id, cx)?;
                return Ok(());
            }
            self.skip_stage_by_system(index, cx)?;
        }
        self.complete_workflow_if_settled(cx);
        Ok(())
    }

    pub(crate) fn stage_applies(&self, index: usize, cx: &StepContext<'_>) -> bool {
        let stage = &self.stages[index];
        match self.definition.stage(stage.workflow_stage_id) {
            Some(def) => is_applicable(
                &def.stage.applicability_conditions,
                &cx.matter.attributes,
                cx.schema,
                &stage.name,
            ),
            None => {
                tracing::warn!(
                    stage = %stage.name,
                    "stage definition missing from pinned template; treating as applicable"
                );
                true
            }
        }
    }

    fn complete_workflow_if_settled(&mut self, cx: &StepContext<'_>) {
        if self.workflow.status == WorkflowStatus::Completed
            || !self.stages.iter().all(|s| s.status.is_settled())
        {
            return;
        }
        self.workflow.status = WorkflowStatus::Completed;
        self.workflow.completed_at = Some(cx.now);
        self.workflow.current_stage_id = None;
        self.touch_workflow();
        tracing::info!(matter_id = %self.matter_id(), "workflow completed");
        self.push_event(WorkflowEvent {
            matter_id: self.matter_id(),
            stage_id: None,
            kind: WorkflowEventKind::WorkflowCompleted,
            from_status: WorkflowStatus::Active.to_string(),
            to_status: WorkflowStatus::Completed.to_string(),
            occurred_at: cx.now,
        });
    }

    /// Fill in due dates that could not be determined when the task was
    /// created, now that more anchor events may have happened.
    fn resolve_deferred_due_dates(&mut self, stage_index: usize, cx: &StepContext<'_>) {
        let stage_id = self.stages[stage_index].id;
        let stage_started_at = self.stages[stage_index].started_at;
        for index in 0..self.tasks.len() {
            let task = &self.tasks[index];
            if task.matter_stage_id != Some(stage_id)
                || task.due_at.is_some()
                || task.due_date_anchor.is_none()
            {
                continue;
            }
            let anchors = AnchorContext {
                stage_started_at,
                task_created_at: Some(task.created_at),
                matter_created_at: cx.matter.created_at,
                matter_opened_at: cx.matter.opened_at,
            };
            if let Some(due_at) =
                due_date::resolve(task.due_date_anchor, task.relative_due_days, &anchors)
            {
                self.tasks[index].due_at = Some(due_at);
                self.touch_task(index, cx.now);
            }
        }
    }
}
