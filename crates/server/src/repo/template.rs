use chrono::{DateTime, Utc};
use shared_types::{
    AppError, StageDefinition, TemplateDefinition, WorkflowStage, WorkflowTaskTemplate,
    WorkflowTemplate,
};
use sqlx::types::Json;
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, Postgres};
use uuid::Uuid;

use super::rows::{
    convert_all, StageRow, TaskTemplateRow, TemplateRow, STAGE_COLUMNS, TASK_TEMPLATE_COLUMNS,
    TEMPLATE_COLUMNS,
};
use super::PgWorkflowStore;
use crate::error_convert::SqlxErrorExt;
use crate::workflow::TemplateStore;

// ── Row writers shared by single inserts and whole-definition inserts ──

async fn insert_template_row(
    conn: &mut PgConnection,
    template: &WorkflowTemplate,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_templates
            (id, key, version, name, practice_area, sub_types, selection_conditions,
             is_default, is_active, released_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(template.id)
    .bind(&template.key)
    .bind(&template.version)
    .bind(&template.name)
    .bind(&template.practice_area)
    .bind(&template.sub_types)
    .bind(Json(&template.selection_conditions))
    .bind(template.is_default)
    .bind(template.is_active)
    .bind(template.released_at)
    .bind(template.created_at)
    .execute(&mut *conn)
    .await
    .map_err(SqlxErrorExt::into_app_error)?;

    Ok(())
}

async fn insert_stage_row(conn: &mut PgConnection, stage: &WorkflowStage) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_stages
            (id, template_id, name, sort_order, gate_type, completion_criteria,
             applicability_conditions, client_visible)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(stage.id)
    .bind(stage.template_id)
    .bind(&stage.name)
    .bind(stage.sort_order)
    .bind(stage.gate_type.as_str())
    .bind(stage.completion_criteria.as_str())
    .bind(Json(&stage.applicability_conditions))
    .bind(stage.client_visible)
    .execute(&mut *conn)
    .await
    .map_err(SqlxErrorExt::into_app_error)?;

    Ok(())
}

async fn insert_task_template_row(
    conn: &mut PgConnection,
    task: &WorkflowTaskTemplate,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_task_templates
            (id, stage_id, title, description, sort_order, is_mandatory, requires_evidence,
             required_evidence_types, requires_verified_evidence, requires_approval,
             required_approver_role, due_date_anchor, relative_due_days)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(task.id)
    .bind(task.stage_id)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.sort_order)
    .bind(task.is_mandatory)
    .bind(task.requires_evidence)
    .bind(&task.required_evidence_types)
    .bind(task.requires_verified_evidence)
    .bind(task.requires_approval)
    .bind(&task.required_approver_role)
    .bind(task.due_date_anchor.map(|a| a.as_str()))
    .bind(task.relative_due_days)
    .execute(&mut *conn)
    .await
    .map_err(SqlxErrorExt::into_app_error)?;

    Ok(())
}

/// Load a template with its stage tree on an existing connection.
pub(crate) async fn load_definition_on(
    conn: &mut PgConnection,
    template_id: Uuid,
) -> Result<Option<TemplateDefinition>, AppError> {
    let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM workflow_templates WHERE id = $1");
    let Some(template) = sqlx::query_as::<_, TemplateRow>(&sql)
        .bind(template_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(SqlxErrorExt::into_app_error)?
    else {
        return Ok(None);
    };

    let sql = format!(
        "SELECT {STAGE_COLUMNS} FROM workflow_stages WHERE template_id = $1 ORDER BY sort_order"
    );
    let stages: Vec<WorkflowStage> = convert_all(
        sqlx::query_as::<_, StageRow>(&sql)
            .bind(template_id)
            .fetch_all(&mut *conn)
            .await
            .map_err(SqlxErrorExt::into_app_error)?,
    )?;

    let sql = format!(
        r#"
        SELECT {TASK_TEMPLATE_COLUMNS}
        FROM workflow_task_templates
        WHERE stage_id IN (SELECT id FROM workflow_stages WHERE template_id = $1)
        ORDER BY sort_order
        "#
    );
    let tasks: Vec<WorkflowTaskTemplate> = convert_all(
        sqlx::query_as::<_, TaskTemplateRow>(&sql)
            .bind(template_id)
            .fetch_all(&mut *conn)
            .await
            .map_err(SqlxErrorExt::into_app_error)?,
    )?;

    let stages = stages
        .into_iter()
        .map(|stage| StageDefinition {
            task_templates: tasks
                .iter()
                .filter(|t| t.stage_id == stage.id)
                .cloned()
                .collect(),
            stage,
        })
        .collect();

    let mut definition = TemplateDefinition {
        template: template.into(),
        stages,
    };
    definition.sort();
    Ok(Some(definition))
}

async fn acquire(store: &PgWorkflowStore) -> Result<PoolConnection<Postgres>, AppError> {
    store
        .pool
        .acquire()
        .await
        .map_err(SqlxErrorExt::into_app_error)
}

impl TemplateStore for PgWorkflowStore {
    async fn insert_template(&self, template: &WorkflowTemplate) -> Result<(), AppError> {
        let mut conn = acquire(self).await?;
        insert_template_row(&mut conn, template).await
    }

    async fn find_template(&self, template_id: Uuid) -> Result<Option<WorkflowTemplate>, AppError> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM workflow_templates WHERE id = $1");
        let row = sqlx::query_as::<_, TemplateRow>(&sql)
            .bind(template_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_app_error)?;

        Ok(row.map(Into::into))
    }

    async fn list_templates(
        &self,
        key: Option<&str>,
        practice_area: Option<&str>,
    ) -> Result<Vec<WorkflowTemplate>, AppError> {
        let sql = format!(
            r#"
            SELECT {TEMPLATE_COLUMNS}
            FROM workflow_templates
            WHERE ($1::TEXT IS NULL OR key = $1)
              AND ($2::TEXT IS NULL OR practice_area = $2)
            ORDER BY key, created_at
            "#
        );
        let rows = sqlx::query_as::<_, TemplateRow>(&sql)
            .bind(key)
            .bind(practice_area)
            .fetch_all(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_app_error)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn load_definition(
        &self,
        template_id: Uuid,
    ) -> Result<Option<TemplateDefinition>, AppError> {
        let mut conn = acquire(self).await?;
        load_definition_on(&mut conn, template_id).await
    }

    async fn find_template_stage(&self, stage_id: Uuid) -> Result<Option<WorkflowStage>, AppError> {
        let sql = format!("SELECT {STAGE_COLUMNS} FROM workflow_stages WHERE id = $1");
        sqlx::query_as::<_, StageRow>(&sql)
            .bind(stage_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_app_error)?
            .map(WorkflowStage::try_from)
            .transpose()
    }

    async fn find_task_template(
        &self,
        task_template_id: Uuid,
    ) -> Result<Option<WorkflowTaskTemplate>, AppError> {
        let sql = format!("SELECT {TASK_TEMPLATE_COLUMNS} FROM workflow_task_templates WHERE id = $1");
        sqlx::query_as::<_, TaskTemplateRow>(&sql)
            .bind(task_template_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_app_error)?
            .map(WorkflowTaskTemplate::try_from)
            .transpose()
    }

    async fn insert_stage(&self, stage: &WorkflowStage) -> Result<(), AppError> {
        let mut conn = acquire(self).await?;
        insert_stage_row(&mut conn, stage).await
    }

    async fn update_stage(&self, stage: &WorkflowStage) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_stages
            SET name = $2, sort_order = $3, gate_type = $4, completion_criteria = $5,
                applicability_conditions = $6, client_visible = $7
            WHERE id = $1
            "#,
        )
        .bind(stage.id)
        .bind(&stage.name)
        .bind(stage.sort_order)
        .bind(stage.gate_type.as_str())
        .bind(stage.completion_criteria.as_str())
        .bind(Json(&stage.applicability_conditions))
        .bind(stage.client_visible)
        .execute(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_app_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Template stage {} not found", stage.id)));
        }
        Ok(())
    }

    async fn insert_task_template(&self, task: &WorkflowTaskTemplate) -> Result<(), AppError> {
        let mut conn = acquire(self).await?;
        insert_task_template_row(&mut conn, task).await
    }

    async fn update_task_template(&self, task: &WorkflowTaskTemplate) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_task_templates
            SET title = $2, description = $3, sort_order = $4, is_mandatory = $5,
                requires_evidence = $6, required_evidence_types = $7,
                requires_verified_evidence = $8, requires_approval = $9,
                required_approver_role = $10, due_date_anchor = $11, relative_due_days = $12
            WHERE id = $1
            "#,
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.sort_order)
        .bind(task.is_mandatory)
        .bind(task.requires_evidence)
        .bind(&task.required_evidence_types)
        .bind(task.requires_verified_evidence)
        .bind(task.requires_approval)
        .bind(&task.required_approver_role)
        .bind(task.due_date_anchor.map(|a| a.as_str()))
        .bind(task.relative_due_days)
        .execute(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_app_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("Task template {} not found", task.id)));
        }
        Ok(())
    }

    async fn mark_released(
        &self,
        template_id: Uuid,
        released_at: DateTime<Utc>,
    ) -> Result<WorkflowTemplate, AppError> {
        let sql = format!(
            r#"
            UPDATE workflow_templates
            SET released_at = $2
            WHERE id = $1 AND released_at IS NULL
            RETURNING {TEMPLATE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, TemplateRow>(&sql)
            .bind(template_id)
            .bind(released_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_app_error)?;

        match row {
            Some(row) => Ok(row.into()),
            None => match self.find_template(template_id).await? {
                Some(existing) => Err(AppError::template_immutable(format!(
                    "Template {} {} is already released",
                    existing.key, existing.version
                ))),
                None => Err(AppError::not_found(format!("Template {} not found", template_id))),
            },
        }
    }

    async fn set_active(
        &self,
        template_id: Uuid,
        is_active: bool,
    ) -> Result<WorkflowTemplate, AppError> {
        let sql = format!(
            "UPDATE workflow_templates SET is_active = $2 WHERE id = $1 RETURNING {TEMPLATE_COLUMNS}"
        );
        sqlx::query_as::<_, TemplateRow>(&sql)
            .bind(template_id)
            .bind(is_active)
            .fetch_optional(&self.pool)
            .await
            .map_err(SqlxErrorExt::into_app_error)?
            .map(Into::into)
            .ok_or_else(|| AppError::not_found(format!("Template {} not found", template_id)))
    }

    async fn insert_definition(&self, definition: &TemplateDefinition) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(SqlxErrorExt::into_app_error)?;

        insert_template_row(&mut tx, &definition.template).await?;
        for def in &definition.stages {
            insert_stage_row(&mut tx, &def.stage).await?;
            for task in &def.task_templates {
                insert_task_template_row(&mut tx, task).await?;
            }
        }

        tx.commit().await.map_err(SqlxErrorExt::into_app_error)?;
        Ok(())
    }
}
