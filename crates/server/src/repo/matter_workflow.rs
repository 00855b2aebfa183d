use shared_types::{
    AppError, EvidenceItem, ExceptionObjectType, MatterStage, MatterWorkflow, Task, TaskException,
    WorkflowView,
};
use sqlx::PgConnection;
use uuid::Uuid;

use super::rows::{
    convert_all, EvidenceRow, ExceptionRow, MatterStageRow, TaskRow, WorkflowRow,
    EVIDENCE_COLUMNS, EXCEPTION_COLUMNS, MATTER_STAGE_COLUMNS, TASK_COLUMNS, WORKFLOW_COLUMNS,
};
use super::template::load_definition_on;
use super::PgWorkflowStore;
use crate::error_convert::SqlxErrorExt;
use crate::workflow::state::ChangeSet;
use crate::workflow::{Committed, MatterWorkflowState, WorkflowStore};

/// How long a mutation waits for another writer's matter lock before
/// giving up with `lock_not_available`.
const LOCK_TIMEOUT: &str = "SET LOCAL lock_timeout = '5s'";

// ── Loading ──────────────────────────────────────────────────────────

/// Load one matter's aggregate. With `for_update` the workflow row stays
/// locked until the surrounding transaction ends.
async fn load_state(
    conn: &mut PgConnection,
    matter_id: Uuid,
    for_update: bool,
) -> Result<Option<MatterWorkflowState>, AppError> {
    let sql = format!(
        "SELECT {WORKFLOW_COLUMNS} FROM matter_workflows WHERE matter_id = $1{}",
        if for_update { " FOR UPDATE" } else { "" }
    );
    let Some(row) = sqlx::query_as::<_, WorkflowRow>(&sql)
        .bind(matter_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(SqlxErrorExt::into_app_error)?
    else {
        return Ok(None);
    };
    let workflow = MatterWorkflow::try_from(row)?;

    let definition = load_definition_on(conn, workflow.workflow_template_id)
        .await?
        .ok_or_else(|| {
            AppError::internal(format!(
                "Workflow {} is pinned to missing template {}",
                workflow.id, workflow.workflow_template_id
            ))
        })?;

    let sql = format!(
        "SELECT {MATTER_STAGE_COLUMNS} FROM matter_stages WHERE matter_workflow_id = $1 ORDER BY sort_order"
    );
    let stages: Vec<MatterStage> = convert_all(
        sqlx::query_as::<_, MatterStageRow>(&sql)
            .bind(workflow.id)
            .fetch_all(&mut *conn)
            .await
            .map_err(SqlxErrorExt::into_app_error)?,
    )?;

    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM workflow_tasks WHERE matter_id = $1 ORDER BY created_at, id"
    );
    let tasks: Vec<Task> = convert_all(
        sqlx::query_as::<_, TaskRow>(&sql)
            .bind(matter_id)
            .fetch_all(&mut *conn)
            .await
            .map_err(SqlxErrorExt::into_app_error)?,
    )?;

    let sql = format!(
        r#"
        SELECT {EVIDENCE_COLUMNS}
        FROM evidence_items
        WHERE task_id IN (SELECT id FROM workflow_tasks WHERE matter_id = $1)
        ORDER BY created_at, id
        "#
    );
    let evidence: Vec<EvidenceItem> = sqlx::query_as::<_, EvidenceRow>(&sql)
        .bind(matter_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(SqlxErrorExt::into_app_error)?
        .into_iter()
        .map(Into::into)
        .collect();

    let sql = format!(
        "SELECT {EXCEPTION_COLUMNS} FROM task_exceptions WHERE matter_id = $1 ORDER BY approved_at, id"
    );
    let exceptions: Vec<TaskException> = convert_all(
        sqlx::query_as::<_, ExceptionRow>(&sql)
            .bind(matter_id)
            .fetch_all(&mut *conn)
            .await
            .map_err(SqlxErrorExt::into_app_error)?,
    )?;

    Ok(Some(MatterWorkflowState::from_parts(
        workflow, definition, stages, tasks, evidence, exceptions,
    )))
}

// ── Persisting ───────────────────────────────────────────────────────

async fn upsert_workflow(conn: &mut PgConnection, w: &MatterWorkflow) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO matter_workflows
            (id, matter_id, workflow_template_id, workflow_version, status,
             current_stage_id, activated_at, activated_by, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO UPDATE
        SET status = EXCLUDED.status,
            current_stage_id = EXCLUDED.current_stage_id,
            completed_at = EXCLUDED.completed_at
        "#,
    )
    .bind(w.id)
    .bind(w.matter_id)
    .bind(w.workflow_template_id)
    .bind(&w.workflow_version)
    .bind(w.status.as_str())
    .bind(w.current_stage_id)
    .bind(w.activated_at)
    .bind(w.activated_by)
    .bind(w.completed_at)
    .execute(&mut *conn)
    .await
    .map_err(SqlxErrorExt::into_app_error)?;

    Ok(())
}

async fn upsert_stage(conn: &mut PgConnection, s: &MatterStage) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO matter_stages
            (id, matter_workflow_id, workflow_stage_id, name, sort_order, gate_type,
             completion_criteria, status, started_at, completed_at, skipped_reason, exception_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (id) DO UPDATE
        SET status = EXCLUDED.status,
            started_at = EXCLUDED.started_at,
            completed_at = EXCLUDED.completed_at,
            skipped_reason = EXCLUDED.skipped_reason,
            exception_id = EXCLUDED.exception_id
        "#,
    )
    .bind(s.id)
    .bind(s.matter_workflow_id)
    .bind(s.workflow_stage_id)
    .bind(&s.name)
    .bind(s.sort_order)
    .bind(s.gate_type.as_str())
    .bind(s.completion_criteria.as_str())
    .bind(s.status.as_str())
    .bind(s.started_at)
    .bind(s.completed_at)
    .bind(&s.skipped_reason)
    .bind(s.exception_id)
    .execute(&mut *conn)
    .await
    .map_err(SqlxErrorExt::into_app_error)?;

    Ok(())
}

async fn upsert_task(conn: &mut PgConnection, t: &Task) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_tasks
            (id, matter_id, matter_stage_id, task_template_id, source, title, status,
             is_mandatory, requires_evidence, required_evidence_types,
             requires_verified_evidence, requires_approval, required_approver_role,
             approval_status, approved_by_id, approved_at, due_date_anchor, relative_due_days,
             due_at, exception_id, completed_by_id, created_at, updated_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                $17, $18, $19, $20, $21, $22, $23, $24)
        ON CONFLICT (id) DO UPDATE
        SET title = EXCLUDED.title,
            status = EXCLUDED.status,
            approval_status = EXCLUDED.approval_status,
            approved_by_id = EXCLUDED.approved_by_id,
            approved_at = EXCLUDED.approved_at,
            due_at = EXCLUDED.due_at,
            exception_id = EXCLUDED.exception_id,
            completed_by_id = EXCLUDED.completed_by_id,
            updated_at = EXCLUDED.updated_at,
            completed_at = EXCLUDED.completed_at
        "#,
    )
    .bind(t.id)
    .bind(t.matter_id)
    .bind(t.matter_stage_id)
    .bind(t.task_template_id)
    .bind(t.source.as_str())
    .bind(&t.title)
    .bind(t.status.as_str())
    .bind(t.is_mandatory)
    .bind(t.requires_evidence)
    .bind(&t.required_evidence_types)
    .bind(t.requires_verified_evidence)
    .bind(t.requires_approval)
    .bind(&t.required_approver_role)
    .bind(t.approval_status.as_str())
    .bind(t.approved_by_id)
    .bind(t.approved_at)
    .bind(t.due_date_anchor.map(|a| a.as_str()))
    .bind(t.relative_due_days)
    .bind(t.due_at)
    .bind(t.exception_id)
    .bind(t.completed_by_id)
    .bind(t.created_at)
    .bind(t.updated_at)
    .bind(t.completed_at)
    .execute(&mut *conn)
    .await
    .map_err(SqlxErrorExt::into_app_error)?;

    Ok(())
}

/// Evidence rows are only ever created here; verification columns belong to
/// the evidence workflow and are never overwritten.
async fn insert_evidence(conn: &mut PgConnection, e: &EvidenceItem) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO evidence_items
            (id, task_id, evidence_type, description, verified_at, verified_by_id,
             verification_method, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(e.id)
    .bind(e.task_id)
    .bind(&e.evidence_type)
    .bind(&e.description)
    .bind(e.verified_at)
    .bind(e.verified_by_id)
    .bind(&e.verification_method)
    .bind(e.created_at)
    .execute(&mut *conn)
    .await
    .map_err(SqlxErrorExt::into_app_error)?;

    Ok(())
}

async fn insert_exception(conn: &mut PgConnection, x: &TaskException) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO task_exceptions
            (id, matter_id, object_type, object_id, exception_type, reason,
             decision_source, approved_by_id, approved_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(x.id)
    .bind(x.matter_id)
    .bind(x.object_type.as_str())
    .bind(x.object_id)
    .bind(x.exception_type.as_str())
    .bind(&x.reason)
    .bind(x.decision_source.as_str())
    .bind(x.approved_by_id)
    .bind(x.approved_at)
    .execute(&mut *conn)
    .await
    .map_err(SqlxErrorExt::into_app_error)?;

    Ok(())
}

/// Write every row the change set names. Parents go before children so
/// foreign keys hold mid-transaction.
async fn persist(
    conn: &mut PgConnection,
    state: &MatterWorkflowState,
    changes: &ChangeSet,
) -> Result<(), AppError> {
    if changes.workflow {
        upsert_workflow(conn, state.workflow()).await?;
    }
    for stage in state.stages().iter().filter(|s| changes.stages.contains(&s.id)) {
        upsert_stage(conn, stage).await?;
    }
    for task in state.tasks().iter().filter(|t| changes.tasks.contains(&t.id)) {
        upsert_task(conn, task).await?;
    }
    for item in state.evidence().iter().filter(|e| changes.evidence.contains(&e.id)) {
        insert_evidence(conn, item).await?;
    }
    for id in &changes.exceptions {
        let exception = state.exception(*id).ok_or_else(|| {
            AppError::internal(format!("Exception {} was recorded but is missing", id))
        })?;
        insert_exception(conn, exception).await?;
    }
    Ok(())
}

impl WorkflowStore for PgWorkflowStore {
    async fn insert_workflow(
        &self,
        mut state: MatterWorkflowState,
    ) -> Result<Committed<WorkflowView>, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(SqlxErrorExt::into_app_error)?;

        let changes = state.take_changes();
        persist(&mut tx, &state, &changes).await?;

        tx.commit().await.map_err(SqlxErrorExt::into_app_error)?;
        Ok(Committed {
            value: state.view(),
            events: changes.events,
        })
    }

    async fn load_workflow(
        &self,
        matter_id: Uuid,
    ) -> Result<Option<MatterWorkflowState>, AppError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(SqlxErrorExt::into_app_error)?;
        load_state(&mut conn, matter_id, false).await
    }

    async fn matter_for_stage(&self, stage_id: Uuid) -> Result<Option<Uuid>, AppError> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT w.matter_id
            FROM matter_stages s
            JOIN matter_workflows w ON w.id = s.matter_workflow_id
            WHERE s.id = $1
            "#,
        )
        .bind(stage_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_app_error)
    }

    async fn matter_for_task(&self, task_id: Uuid) -> Result<Option<Uuid>, AppError> {
        sqlx::query_scalar::<_, Uuid>("SELECT matter_id FROM workflow_tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_app_error)
    }

    async fn with_matter<T, F>(&self, matter_id: Uuid, apply: F) -> Result<Committed<T>, AppError>
    where
        F: FnOnce(&mut MatterWorkflowState) -> Result<T, AppError> + Send,
        T: Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(SqlxErrorExt::into_app_error)?;
        sqlx::query(LOCK_TIMEOUT)
            .execute(&mut *tx)
            .await
            .map_err(SqlxErrorExt::into_app_error)?;

        let mut state = load_state(&mut tx, matter_id, true)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Matter {} has no workflow", matter_id)))?;

        // Dropping the transaction on error rolls everything back.
        let value = apply(&mut state)?;
        let changes = state.take_changes();
        if !changes.is_empty() {
            persist(&mut tx, &state, &changes).await?;
        }

        tx.commit().await.map_err(SqlxErrorExt::into_app_error)?;
        Ok(Committed {
            value,
            events: changes.events,
        })
    }

    async fn find_stage(&self, stage_id: Uuid) -> Result<Option<MatterStage>, AppError> {
        let sql = format!("SELECT {MATTER_STAGE_COLUMNS} FROM matter_stages WHERE id = $1");
        sqlx::query_as::<_, MatterStageRow>(&sql)
            .bind(stage_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_app_error)?
            .map(MatterStage::try_from)
            .transpose()
    }

    async fn list_stage_tasks(&self, stage_id: Uuid) -> Result<Vec<Task>, AppError> {
        let sql = format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM workflow_tasks
            WHERE matter_stage_id = $1
            ORDER BY (source = 'manual'), created_at, id
            "#
        );
        convert_all(
            sqlx::query_as::<_, TaskRow>(&sql)
                .bind(stage_id)
                .fetch_all(&self.pool)
                .await
                .map_err(SqlxErrorExt::into_app_error)?,
        )
    }

    async fn find_task(&self, task_id: Uuid) -> Result<Option<Task>, AppError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM workflow_tasks WHERE id = $1");
        sqlx::query_as::<_, TaskRow>(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_app_error)?
            .map(Task::try_from)
            .transpose()
    }

    async fn list_exceptions(
        &self,
        object_type: ExceptionObjectType,
        object_id: Uuid,
    ) -> Result<Vec<TaskException>, AppError> {
        let sql = format!(
            r#"
            SELECT {EXCEPTION_COLUMNS}
            FROM task_exceptions
            WHERE object_type = $1 AND object_id = $2
            ORDER BY approved_at, id
            "#
        );
        convert_all(
            sqlx::query_as::<_, ExceptionRow>(&sql)
                .bind(object_type.as_str())
                .bind(object_id)
                .fetch_all(&self.pool)
                .await
                .map_err(SqlxErrorExt::into_app_error)?,
        )
    }
}
