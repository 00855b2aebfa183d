//! Reconciliation checks over a stored workflow aggregate.

use shared_types::{
    ExceptionObjectType, ExceptionType, GateType, InvariantViolation, StageStatus, TaskStatus,
};

use super::state::MatterWorkflowState;

impl MatterWorkflowState {
    /// Every ledger or cache invariant the stored rows currently break.
    pub fn audit_invariants(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        for task in &self.tasks {
            let Some(wanted) = task.status.exception_type() else {
                continue;
            };
            let active = task.exception_id.and_then(|id| self.exception(id));
            match active {
                Some(e)
                    if e.object_type == ExceptionObjectType::Task
                        && e.object_id == task.id
                        && e.exception_type == wanted => {}
                Some(_) => violations.push(InvariantViolation {
                    object_type: ExceptionObjectType::Task,
                    object_id: task.id,
                    description: format!(
                        "task is {} but its active exception does not match",
                        task.status
                    ),
                }),
                None => violations.push(InvariantViolation {
                    object_type: ExceptionObjectType::Task,
                    object_id: task.id,
                    description: format!("task is {} without an exception", task.status),
                }),
            }
        }

        for (index, stage) in self.stages.iter().enumerate() {
            let active = stage.exception_id.and_then(|id| self.exception(id));
            match stage.status {
                StageStatus::Skipped => {
                    let backed = active.is_some_and(|e| {
                        e.object_id == stage.id && e.exception_type == ExceptionType::Skipped
                    });
                    if !backed || stage.skipped_reason.is_none() {
                        violations.push(InvariantViolation {
                            object_type: ExceptionObjectType::Stage,
                            object_id: stage.id,
                            description: "stage is skipped without a skip exception and reason"
                                .to_string(),
                        });
                    }
                }
                StageStatus::Completed if stage.gate_type == GateType::Hard => {
                    let all_mandatory_resolved = self
                        .tasks
                        .iter()
                        .filter(|t| t.gates_stage(stage.id) && t.is_mandatory)
                        .all(|t| self.is_resolved(t));
                    let overridden = active.is_some_and(|e| {
                        e.object_id == stage.id && e.exception_type == ExceptionType::GateOverride
                    });
                    if !all_mandatory_resolved && !overridden {
                        violations.push(InvariantViolation {
                            object_type: ExceptionObjectType::Stage,
                            object_id: stage.id,
                            description:
                                "hard-gated stage completed with unresolved mandatory tasks and no gate_override"
                                    .to_string(),
                        });
                    }
                }
                _ => {}
            }

            let started = matches!(stage.status, StageStatus::InProgress | StageStatus::Completed);
            if started
                && self.stages[..index]
                    .iter()
                    .any(|earlier| !earlier.status.is_settled())
            {
                violations.push(InvariantViolation {
                    object_type: ExceptionObjectType::Stage,
                    object_id: stage.id,
                    description: "stage started before an earlier stage settled".to_string(),
                });
            }
            if index > 0 && self.stages[index - 1].sort_order >= stage.sort_order {
                violations.push(InvariantViolation {
                    object_type: ExceptionObjectType::Stage,
                    object_id: stage.id,
                    description: "stage sort order does not strictly increase".to_string(),
                });
            }
        }

        let derived = self.derived_current_stage();
        if self.workflow.current_stage_id != derived {
            violations.push(InvariantViolation {
                object_type: ExceptionObjectType::Stage,
                object_id: self.workflow.current_stage_id.or(derived).unwrap_or(self.workflow.id),
                description: format!(
                    "cached current stage {:?} differs from derived {:?}",
                    self.workflow.current_stage_id, derived
                ),
            });
        }

        let completed_tasks_without_time = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed && t.completed_at.is_none());
        for task in completed_tasks_without_time {
            violations.push(InvariantViolation {
                object_type: ExceptionObjectType::Task,
                object_id: task.id,
                description: "task is completed without completed_at".to_string(),
            });
        }

        violations
    }
}
