use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use shared_types::{AppError, ExceptionSearchParams, TaskException};

use crate::db::PgEngine;

/// Exception history of one task or stage, oldest first.
#[utoipa::path(
    get,
    path = "/api/exceptions",
    params(ExceptionSearchParams),
    responses(
        (status = 200, description = "Exception records", body = Vec<TaskException>)
    ),
    tag = "exceptions"
)]
pub async fn list_exceptions(
    State(engine): State<Arc<PgEngine>>,
    Query(params): Query<ExceptionSearchParams>,
) -> Result<Json<Vec<TaskException>>, AppError> {
    let exceptions = engine
        .list_exceptions(params.object_type, params.object_id)
        .await?;
    Ok(Json(exceptions))
}
