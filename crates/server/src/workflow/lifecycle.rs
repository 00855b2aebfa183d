//! Task lifecycle
//!
//! Transition table:
//!
//! | from                     | to                        | requires                    |
//! |--------------------------|---------------------------|-----------------------------|
//! | pending                  | in_progress               |                             |
//! | pending, in_progress     | completed                 | evidence/approval satisfied |
//! | pending, in_progress     | skipped, not_applicable   | approved exception          |
//! | skipped, not_applicable  | pending                   | owning stage not completed  |
//!
//! Completed is terminal. Resolving a workflow task re-evaluates its stage
//! within the same mutation.

use chrono::{DateTime, Utc};
use shared_types::{
    AppError, ApprovalStatus, EvidenceItem, ExceptionObjectType, MissingPrecondition,
    StageStatus, Task, TaskSource, TaskStatus,
};
use uuid::Uuid;

use super::ledger::ApprovedException;
use super::state::{MatterWorkflowState, StepContext};

/// Whether `from -> to` appears in the transition table.
pub fn is_allowed_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, InProgress)
            | (Pending | InProgress, Completed)
            | (Pending | InProgress, Skipped | NotApplicable)
            | (Skipped | NotApplicable, Pending)
    )
}

impl MatterWorkflowState {
    /// Completion preconditions the task does not meet yet.
    pub fn missing_preconditions(&self, task: &Task) -> Vec<MissingPrecondition> {
        let evidence: Vec<&EvidenceItem> = self.task_evidence(task.id).collect();
        let mut missing = Vec::new();

        if task.requires_evidence && evidence.is_empty() {
            missing.push(MissingPrecondition::Evidence);
        }
        let absent: Vec<String> = task
            .required_evidence_types
            .iter()
            .filter(|wanted| !evidence.iter().any(|e| &e.evidence_type == *wanted))
            .cloned()
            .collect();
        if !absent.is_empty() {
            missing.push(MissingPrecondition::EvidenceTypes { missing: absent });
        }
        if task.requires_verified_evidence && !evidence.iter().any(|e| e.verified_at.is_some()) {
            missing.push(MissingPrecondition::VerifiedEvidence);
        }
        if task.requires_approval && task.approval_status != ApprovalStatus::Approved {
            missing.push(MissingPrecondition::Approval {
                status: task.approval_status,
            });
        }
        missing
    }

    pub fn update_task_status(
        &mut self,
        task_id: Uuid,
        to: TaskStatus,
        actor: i64,
        exception: Option<&ApprovedException>,
        cx: &StepContext<'_>,
    ) -> Result<Task, AppError> {
        let index = self.task_index(task_id)?;
        let from = self.tasks[index].status;

        if from == to {
            tracing::debug!(%task_id, status = %to, "task already in requested status");
            return Ok(self.tasks[index].clone());
        }
        if !is_allowed_transition(from, to) {
            return Err(AppError::bad_request(format!(
                "Task cannot move from {} to {}",
                from, to
            )));
        }

        match to {
            TaskStatus::InProgress => {
                self.tasks[index].status = to;
            }
            TaskStatus::Completed => {
                let missing = self.missing_preconditions(&self.tasks[index]);
                if !missing.is_empty() {
                    return Err(AppError::gate_unsatisfied(
                        format!("Task '{}' cannot be completed yet", self.tasks[index].title),
                        MissingPrecondition::to_field_errors(&missing),
                    ));
                }
                let task = &mut self.tasks[index];
                task.status = to;
                task.completed_by_id = Some(actor);
                task.completed_at = Some(cx.now);
            }
            TaskStatus::Skipped | TaskStatus::NotApplicable => {
                let exception = exception.ok_or_else(|| {
                    AppError::invalid_exception(format!(
                        "Marking a task {} requires an exception with a reason and approver",
                        to
                    ))
                })?;
                let exception_type = to
                    .exception_type()
                    .ok_or_else(|| AppError::internal("status has no exception type"))?;
                let exception_id = self.record_exception(
                    ExceptionObjectType::Task,
                    task_id,
                    exception_type,
                    exception,
                    cx.now,
                )?;
                let task = &mut self.tasks[index];
                task.status = to;
                task.exception_id = Some(exception_id);
            }
            TaskStatus::Pending => {
                self.ensure_stage_open(&self.tasks[index])?;
                // The ledger row stays; only the active pointer is cleared.
                let task = &mut self.tasks[index];
                task.status = to;
                task.exception_id = None;
            }
        }
        self.touch_task(index, cx.now);
        tracing::info!(
            matter_id = %self.matter_id(),
            %task_id,
            %from,
            %to,
            actor,
            "task status changed"
        );

        let task = &self.tasks[index];
        if task.source == TaskSource::Workflow && self.is_resolved(task) {
            if let Some(stage_id) = task.matter_stage_id {
                self.evaluate_stage(stage_id, cx)?;
            }
        }
        Ok(self.tasks[index].clone())
    }

    /// Record an approval decision. The caller has already checked the
    /// approver's role.
    pub fn decide_approval(
        &mut self,
        task_id: Uuid,
        approver_id: i64,
        approve: bool,
        now: DateTime<Utc>,
    ) -> Result<Task, AppError> {
        let index = self.task_index(task_id)?;
        let task = &mut self.tasks[index];
        if !task.requires_approval {
            return Err(AppError::bad_request(format!(
                "Task '{}' does not require approval",
                task.title
            )));
        }
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::InProgress) {
            return Err(AppError::conflict(format!(
                "Task '{}' is {}; approval can no longer change",
                task.title, task.status
            )));
        }
        task.approval_status = if approve {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        task.approved_by_id = Some(approver_id);
        task.approved_at = Some(now);
        tracing::info!(%task_id, approver_id, approve, "approval decided");
        self.touch_task(index, now);
        Ok(self.tasks[index].clone())
    }

    /// Link an evidence item to a task of this matter.
    pub fn link_evidence(
        &mut self,
        task_id: Uuid,
        evidence_type: &str,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<EvidenceItem, AppError> {
        let index = self.task_index(task_id)?;
        if self.tasks[index].status == TaskStatus::Completed {
            return Err(AppError::conflict("Evidence cannot be added to a completed task"));
        }
        let item = EvidenceItem {
            id: Uuid::new_v4(),
            task_id,
            evidence_type: evidence_type.to_string(),
            description,
            verified_at: None,
            verified_by_id: None,
            verification_method: None,
            created_at: now,
        };
        self.push_evidence(item.clone());
        self.touch_task(index, now);
        Ok(item)
    }

    /// Create an ad-hoc task. Manual tasks never count towards a gate.
    pub fn create_manual_task(
        &mut self,
        title: &str,
        matter_stage_id: Option<Uuid>,
        due_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Task, AppError> {
        if title.trim().is_empty() {
            return Err(AppError::bad_request("Task title is required"));
        }
        if let Some(stage_id) = matter_stage_id {
            self.stage_index(stage_id)?;
        }
        let task = Task {
            id: Uuid::new_v4(),
            matter_id: self.matter_id(),
            matter_stage_id,
            task_template_id: None,
            source: TaskSource::Manual,
            title: title.trim().to_string(),
            status: TaskStatus::Pending,
            is_mandatory: false,
            requires_evidence: false,
            required_evidence_types: Vec::new(),
            requires_verified_evidence: false,
            requires_approval: false,
            required_approver_role: None,
            approval_status: ApprovalStatus::NotRequired,
            approved_by_id: None,
            approved_at: None,
            due_date_anchor: None,
            relative_due_days: None,
            due_at,
            exception_id: None,
            completed_by_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.push_task(task.clone());
        Ok(task)
    }

    fn ensure_stage_open(&self, task: &Task) -> Result<(), AppError> {
        let Some(stage) = task.matter_stage_id.and_then(|id| self.stage(id)) else {
            return Ok(());
        };
        if stage.status == StageStatus::Completed {
            return Err(AppError::conflict(format!(
                "Stage '{}' is completed; its tasks can no longer be reopened",
                stage.name
            )));
        }
        Ok(())
    }
}
