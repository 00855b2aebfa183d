use shared_types::AppError;

/// Convert a sqlx::Error into an AppError.
pub fn sqlx_to_app_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::RowNotFound => AppError::not_found("Resource not found"),
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            // unique_violation
            Some("23505") => {
                let constraint = db_err.constraint().unwrap_or_default();
                if constraint.contains("matter_workflows_matter_id") {
                    AppError::duplicate_workflow("This matter already has a workflow")
                } else if constraint.contains("workflow_templates_key_version") {
                    AppError::conflict("A template with this key and version already exists")
                } else if constraint.contains("sort_order") {
                    AppError::conflict("This sort order is already used")
                } else {
                    AppError::conflict("A record with this value already exists")
                }
            }
            // serialization_failure, deadlock_detected, lock_not_available
            Some("40001") | Some("40P01") | Some("55P03") => {
                AppError::concurrent_update("The workflow was modified concurrently; try again")
            }
            // raised by the released-template guard triggers
            Some("P0001") if db_err.message().contains("released") => {
                AppError::template_immutable(db_err.message().to_string())
            }
            _ => AppError::database(err.to_string()),
        },
        _ => AppError::database(err.to_string()),
    }
}

/// Extension trait providing `.into_app_error()` on sqlx::Error.
pub trait SqlxErrorExt {
    fn into_app_error(self) -> AppError;
}

impl SqlxErrorExt for sqlx::Error {
    fn into_app_error(self) -> AppError {
        sqlx_to_app_error(self)
    }
}

/// Trait for validating request DTOs before processing.
pub trait ValidateRequest {
    fn validate_request(&self) -> Result<(), AppError>;
}

impl<T: validator::Validate> ValidateRequest for T {
    fn validate_request(&self) -> Result<(), AppError> {
        self.validate().map_err(AppError::from)
    }
}
