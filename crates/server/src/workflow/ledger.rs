//! Exception ledger
//!
//! Every skip, not-applicable marking and forced gate progression is backed
//! by an immutable `TaskException`. The ledger is append-only: undoing a skip
//! clears the object's active-exception pointer but never removes the row.

use chrono::{DateTime, Utc};
use shared_types::{
    AppError, DecisionSource, ExceptionObjectType, ExceptionPayload, ExceptionType, TaskException,
};
use uuid::Uuid;

use super::collaborators::RoleChecker;
use super::state::MatterWorkflowState;

/// Reason recorded when the engine skips a stage whose applicability
/// conditions do not hold.
pub const SYSTEM_SKIP_REASON: &str = "applicability conditions not met";

/// An exception payload that has passed validation. Only obtainable through
/// `ApprovedException::system` or `approve_exception`, so engine steps can
/// never record an unchecked override.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovedException {
    reason: String,
    approver_id: Option<i64>,
    source: DecisionSource,
}

impl ApprovedException {
    pub fn system(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            approver_id: None,
            source: DecisionSource::System,
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn approver_id(&self) -> Option<i64> {
        self.approver_id
    }

    pub fn source(&self) -> DecisionSource {
        self.source
    }
}

/// Validate a user-supplied exception: the reason must be non-blank and the
/// approver must hold `approver_role`.
pub async fn approve_exception<R: RoleChecker>(
    roles: &R,
    approver_role: &str,
    payload: &ExceptionPayload,
) -> Result<ApprovedException, AppError> {
    let reason = payload.reason.trim();
    if reason.is_empty() {
        return Err(AppError::invalid_exception("Exception reason is required"));
    }
    if !roles.has_role(payload.approver_id, approver_role).await? {
        return Err(AppError::invalid_exception(format!(
            "User {} does not hold the '{}' role required to approve exceptions",
            payload.approver_id, approver_role
        )));
    }
    Ok(ApprovedException {
        reason: reason.to_string(),
        approver_id: Some(payload.approver_id),
        source: DecisionSource::User,
    })
}

fn compatible(object_type: ExceptionObjectType, exception_type: ExceptionType) -> bool {
    matches!(
        (object_type, exception_type),
        (ExceptionObjectType::Task, ExceptionType::Skipped)
            | (ExceptionObjectType::Task, ExceptionType::NotApplicable)
            | (ExceptionObjectType::Stage, ExceptionType::Skipped)
            | (ExceptionObjectType::Stage, ExceptionType::GateOverride)
    )
}

impl MatterWorkflowState {
    /// Append an exception for a task or stage of this matter and return its
    /// id. If the object already has an active exception of the same type,
    /// that exception's id is returned and nothing is written.
    ///
    /// The caller is responsible for pointing the object at the returned id.
    pub fn record_exception(
        &mut self,
        object_type: ExceptionObjectType,
        object_id: Uuid,
        exception_type: ExceptionType,
        approval: &ApprovedException,
        now: DateTime<Utc>,
    ) -> Result<Uuid, AppError> {
        if approval.reason.trim().is_empty() {
            return Err(AppError::invalid_exception("Exception reason is required"));
        }
        if !compatible(object_type, exception_type) {
            return Err(AppError::invalid_exception(format!(
                "A {} exception cannot be recorded against a {}",
                exception_type, object_type
            )));
        }

        // Ownership check: the target must belong to this matter's workflow.
        let active = match object_type {
            ExceptionObjectType::Task => self
                .task(object_id)
                .ok_or_else(|| AppError::not_found(format!("Task {} not found", object_id)))?
                .exception_id,
            ExceptionObjectType::Stage => self
                .stage(object_id)
                .ok_or_else(|| AppError::not_found(format!("Stage {} not found", object_id)))?
                .exception_id,
        };

        if let Some(active_id) = active {
            if let Some(existing) = self.exception(active_id) {
                if existing.exception_type == exception_type {
                    tracing::debug!(
                        %object_id,
                        exception_id = %active_id,
                        "exception already active; not recording a duplicate"
                    );
                    return Ok(active_id);
                }
                return Err(AppError::conflict(format!(
                    "{} {} already has an active {} exception",
                    object_type, object_id, existing.exception_type
                )));
            }
        }

        let exception = TaskException {
            id: Uuid::new_v4(),
            matter_id: self.matter_id(),
            object_type,
            object_id,
            exception_type,
            reason: approval.reason.clone(),
            decision_source: approval.source,
            approved_by_id: approval.approver_id,
            approved_at: now,
        };
        let id = exception.id;
        tracing::info!(
            matter_id = %self.matter_id(),
            %object_type,
            %object_id,
            %exception_type,
            decision_source = %approval.source,
            "exception recorded"
        );
        self.push_exception(exception);
        Ok(id)
    }

    /// Exceptions recorded against one object, oldest first.
    pub fn exceptions_for(
        &self,
        object_type: ExceptionObjectType,
        object_id: Uuid,
    ) -> Vec<TaskException> {
        let mut found: Vec<TaskException> = self
            .exceptions
            .iter()
            .filter(|e| e.object_type == object_type && e.object_id == object_id)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.approved_at);
        found
    }
}
