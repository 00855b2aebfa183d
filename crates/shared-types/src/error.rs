use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Categorization of application errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum AppErrorKind {
    NotFound,
    BadRequest,
    Unauthorized,
    Forbidden,
    ValidationError,
    Conflict,
    DatabaseError,
    InternalError,
    /// Edit attempted on a released workflow template.
    TemplateImmutable,
    /// The matter already has a workflow.
    DuplicateWorkflow,
    /// Task completion attempted before its evidence/approval preconditions hold.
    GateUnsatisfied,
    /// Hard-gated stage progression attempted without an override exception.
    GateBlocked,
    /// Exception payload missing a reason or approved by an unauthorized user.
    InvalidException,
    /// Stage evaluation lost a race and the retry budget is exhausted.
    ConcurrentUpdate,
}

impl fmt::Display for AppErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppErrorKind::NotFound => write!(f, "NotFound"),
            AppErrorKind::BadRequest => write!(f, "BadRequest"),
            AppErrorKind::Unauthorized => write!(f, "Unauthorized"),
            AppErrorKind::Forbidden => write!(f, "Forbidden"),
            AppErrorKind::ValidationError => write!(f, "ValidationError"),
            AppErrorKind::Conflict => write!(f, "Conflict"),
            AppErrorKind::DatabaseError => write!(f, "DatabaseError"),
            AppErrorKind::InternalError => write!(f, "InternalError"),
            AppErrorKind::TemplateImmutable => write!(f, "TemplateImmutable"),
            AppErrorKind::DuplicateWorkflow => write!(f, "DuplicateWorkflow"),
            AppErrorKind::GateUnsatisfied => write!(f, "GateUnsatisfied"),
            AppErrorKind::GateBlocked => write!(f, "GateBlocked"),
            AppErrorKind::InvalidException => write!(f, "InvalidException"),
            AppErrorKind::ConcurrentUpdate => write!(f, "ConcurrentUpdate"),
        }
    }
}

/// Structured application error used by the engine, the stores and the REST layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AppError {
    pub kind: AppErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub field_errors: HashMap<String, String>,
}

impl AppError {
    fn with_kind(kind: AppErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            field_errors: HashMap::new(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_kind(AppErrorKind::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_kind(AppErrorKind::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::with_kind(AppErrorKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::with_kind(AppErrorKind::Forbidden, message)
    }

    pub fn validation(message: impl Into<String>, field_errors: HashMap<String, String>) -> Self {
        Self {
            kind: AppErrorKind::ValidationError,
            message: message.into(),
            field_errors,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::with_kind(AppErrorKind::Conflict, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::with_kind(AppErrorKind::DatabaseError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_kind(AppErrorKind::InternalError, message)
    }

    pub fn template_immutable(message: impl Into<String>) -> Self {
        Self::with_kind(AppErrorKind::TemplateImmutable, message)
    }

    pub fn duplicate_workflow(message: impl Into<String>) -> Self {
        Self::with_kind(AppErrorKind::DuplicateWorkflow, message)
    }

    /// Gate failure carrying one entry per missing precondition.
    pub fn gate_unsatisfied(
        message: impl Into<String>,
        missing: HashMap<String, String>,
    ) -> Self {
        Self {
            kind: AppErrorKind::GateUnsatisfied,
            message: message.into(),
            field_errors: missing,
        }
    }

    pub fn gate_blocked(message: impl Into<String>) -> Self {
        Self::with_kind(AppErrorKind::GateBlocked, message)
    }

    pub fn invalid_exception(message: impl Into<String>) -> Self {
        Self::with_kind(AppErrorKind::InvalidException, message)
    }

    pub fn concurrent_update(message: impl Into<String>) -> Self {
        Self::with_kind(AppErrorKind::ConcurrentUpdate, message)
    }

    pub fn is_concurrent_update(&self) -> bool {
        self.kind == AppErrorKind::ConcurrentUpdate
    }

    #[cfg_attr(not(feature = "server"), allow(dead_code))]
    fn status_code_u16(&self) -> u16 {
        match self.kind {
            AppErrorKind::NotFound => 404,
            AppErrorKind::BadRequest => 400,
            AppErrorKind::Unauthorized => 401,
            AppErrorKind::Forbidden => 403,
            AppErrorKind::ValidationError => 422,
            AppErrorKind::Conflict => 409,
            AppErrorKind::DatabaseError => 500,
            AppErrorKind::InternalError => 500,
            AppErrorKind::TemplateImmutable => 409,
            AppErrorKind::DuplicateWorkflow => 409,
            AppErrorKind::GateUnsatisfied => 422,
            AppErrorKind::GateBlocked => 409,
            AppErrorKind::InvalidException => 422,
            AppErrorKind::ConcurrentUpdate => 409,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AppError {}

#[cfg(feature = "validation")]
impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut field_errors = HashMap::new();
        for (field, errs) in errors.field_errors() {
            if let Some(first) = errs.first() {
                let msg = first
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for {}", field));
                field_errors.insert(field.to_string(), msg);
            }
        }
        AppError::validation("Validation failed", field_errors)
    }
}

#[cfg(feature = "server")]
impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = axum::http::StatusCode::from_u16(self.status_code_u16())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        (status, axum::Json(self)).into_response()
    }
}
