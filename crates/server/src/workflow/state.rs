//! The per-matter workflow aggregate.
//!
//! Everything one matter's workflow owns (stages, tasks, evidence links and
//! exceptions) is loaded into a `MatterWorkflowState`, mutated by the pure
//! engine steps in `activator`, `lifecycle`, `gate` and `ledger`, and written
//! back by a store in a single commit. The state records which rows changed
//! and which events were raised so stores can persist incrementally.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use shared_types::{
    AppError, EvidenceItem, MatterContext, MatterStage, MatterWorkflow, StageStatus, Task,
    TaskException, TemplateDefinition, WorkflowEvent, WorkflowEventKind, WorkflowView,
};
use uuid::Uuid;

use super::conditions::AttributeSchema;

/// Inputs shared by every engine step within one mutation.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// Matter attributes and timestamps as known at the start of the call.
    pub matter: &'a MatterContext,
    pub schema: &'a AttributeSchema,
    pub now: DateTime<Utc>,
}

/// Rows touched and events raised since the state was loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub workflow: bool,
    pub stages: BTreeSet<Uuid>,
    pub tasks: BTreeSet<Uuid>,
    pub evidence: BTreeSet<Uuid>,
    /// Newly appended ledger entries, in append order.
    pub exceptions: Vec<Uuid>,
    pub events: Vec<WorkflowEvent>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        !self.workflow
            && self.stages.is_empty()
            && self.tasks.is_empty()
            && self.evidence.is_empty()
            && self.exceptions.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MatterWorkflowState {
    pub(crate) workflow: MatterWorkflow,
    pub(crate) definition: TemplateDefinition,
    /// Ordered by `sort_order`.
    pub(crate) stages: Vec<MatterStage>,
    /// Every task of the matter, workflow and manual.
    pub(crate) tasks: Vec<Task>,
    pub(crate) evidence: Vec<EvidenceItem>,
    pub(crate) exceptions: Vec<TaskException>,
    changes: ChangeSet,
}

impl MatterWorkflowState {
    /// Rebuild the aggregate from stored rows.
    pub fn from_parts(
        workflow: MatterWorkflow,
        mut definition: TemplateDefinition,
        mut stages: Vec<MatterStage>,
        tasks: Vec<Task>,
        evidence: Vec<EvidenceItem>,
        exceptions: Vec<TaskException>,
    ) -> Self {
        definition.sort();
        stages.sort_by_key(|s| s.sort_order);
        Self {
            workflow,
            definition,
            stages,
            tasks,
            evidence,
            exceptions,
            changes: ChangeSet::default(),
        }
    }

    pub(crate) fn empty(workflow: MatterWorkflow, definition: TemplateDefinition) -> Self {
        Self::from_parts(workflow, definition, Vec::new(), Vec::new(), Vec::new(), Vec::new())
    }

    pub fn matter_id(&self) -> Uuid {
        self.workflow.matter_id
    }

    pub fn workflow(&self) -> &MatterWorkflow {
        &self.workflow
    }

    pub fn definition(&self) -> &TemplateDefinition {
        &self.definition
    }

    pub fn stages(&self) -> &[MatterStage] {
        &self.stages
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn evidence(&self) -> &[EvidenceItem] {
        &self.evidence
    }

    pub fn exceptions(&self) -> &[TaskException] {
        &self.exceptions
    }

    pub fn view(&self) -> WorkflowView {
        WorkflowView {
            workflow: self.workflow.clone(),
            stages: self.stages.clone(),
        }
    }

    pub fn stage(&self, stage_id: Uuid) -> Option<&MatterStage> {
        self.stages.iter().find(|s| s.id == stage_id)
    }

    pub fn task(&self, task_id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn exception(&self, exception_id: Uuid) -> Option<&TaskException> {
        self.exceptions.iter().find(|e| e.id == exception_id)
    }

    /// Tasks attached to a stage, workflow tasks first in creation order.
    pub fn stage_tasks(&self, stage_id: Uuid) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.matter_stage_id == Some(stage_id))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| (t.source, t.created_at));
        tasks
    }

    pub fn task_evidence(&self, task_id: Uuid) -> impl Iterator<Item = &EvidenceItem> {
        self.evidence.iter().filter(move |e| e.task_id == task_id)
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Hand the accumulated changes to the store, leaving the state clean.
    pub fn take_changes(&mut self) -> ChangeSet {
        std::mem::take(&mut self.changes)
    }

    /// Mark every row as changed, for the initial insert after activation.
    pub(crate) fn mark_all_changed(&mut self) {
        self.changes.workflow = true;
        self.changes.stages = self.stages.iter().map(|s| s.id).collect();
        self.changes.tasks = self.tasks.iter().map(|t| t.id).collect();
        self.changes.evidence = self.evidence.iter().map(|e| e.id).collect();
        let recorded: BTreeSet<Uuid> = self.changes.exceptions.iter().copied().collect();
        for exception in &self.exceptions {
            if !recorded.contains(&exception.id) {
                self.changes.exceptions.push(exception.id);
            }
        }
    }

    pub(crate) fn stage_index(&self, stage_id: Uuid) -> Result<usize, AppError> {
        self.stages
            .iter()
            .position(|s| s.id == stage_id)
            .ok_or_else(|| AppError::not_found(format!("Stage {} not found", stage_id)))
    }

    pub(crate) fn task_index(&self, task_id: Uuid) -> Result<usize, AppError> {
        self.tasks
            .iter()
            .position(|t| t.id == task_id)
            .ok_or_else(|| AppError::not_found(format!("Task {} not found", task_id)))
    }

    pub(crate) fn touch_task(&mut self, index: usize, now: DateTime<Utc>) {
        let task = &mut self.tasks[index];
        task.updated_at = now;
        self.changes.tasks.insert(task.id);
    }

    pub(crate) fn touch_stage(&mut self, index: usize) {
        self.changes.stages.insert(self.stages[index].id);
    }

    pub(crate) fn touch_workflow(&mut self) {
        self.changes.workflow = true;
    }

    pub(crate) fn push_task(&mut self, task: Task) {
        self.changes.tasks.insert(task.id);
        self.tasks.push(task);
    }

    pub(crate) fn push_evidence(&mut self, item: EvidenceItem) {
        self.changes.evidence.insert(item.id);
        self.evidence.push(item);
    }

    pub(crate) fn push_exception(&mut self, exception: TaskException) {
        self.changes.exceptions.push(exception.id);
        self.exceptions.push(exception);
    }

    /// Move a stage to a new status, raise the transition event and keep the
    /// cached current-stage pointer in line with the stage statuses.
    pub(crate) fn set_stage_status(&mut self, index: usize, to: StageStatus, now: DateTime<Utc>) {
        let stage = &mut self.stages[index];
        let from = stage.status;
        if from == to {
            return;
        }
        stage.status = to;
        let event = WorkflowEvent {
            matter_id: self.workflow.matter_id,
            stage_id: Some(stage.id),
            kind: WorkflowEventKind::StageTransition,
            from_status: from.to_string(),
            to_status: to.to_string(),
            occurred_at: now,
        };
        tracing::info!(
            matter_id = %self.workflow.matter_id,
            stage = %stage.name,
            from = %from,
            to = %to,
            "stage transition"
        );
        self.changes.stages.insert(stage.id);
        self.changes.events.push(event);
        self.refresh_current_stage();
    }

    pub(crate) fn push_event(&mut self, event: WorkflowEvent) {
        self.changes.events.push(event);
    }

    /// The in-progress stage, derived from stage statuses.
    pub fn derived_current_stage(&self) -> Option<Uuid> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::InProgress)
            .map(|s| s.id)
    }

    fn refresh_current_stage(&mut self) {
        let derived = self.derived_current_stage();
        if self.workflow.current_stage_id != derived {
            self.workflow.current_stage_id = derived;
            self.changes.workflow = true;
        }
    }
}
