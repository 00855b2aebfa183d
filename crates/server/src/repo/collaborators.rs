use chrono::{DateTime, Utc};
use shared_types::{AppError, MatterAttributes, MatterContext};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use super::rows::AttributeRow;
use crate::error_convert::SqlxErrorExt;
use crate::workflow::{AttributeProvider, RoleChecker};

#[derive(Debug, sqlx::FromRow)]
struct MatterRow {
    id: Uuid,
    created_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
}

/// Reads matter timestamps from `matters` and typed attributes from
/// `matter_attributes`.
#[derive(Debug, Clone)]
pub struct PgAttributeProvider {
    pool: Pool<Postgres>,
}

impl PgAttributeProvider {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

impl AttributeProvider for PgAttributeProvider {
    async fn get_attributes(&self, matter_id: Uuid) -> Result<MatterContext, AppError> {
        let matter = sqlx::query_as::<_, MatterRow>(
            "SELECT id, created_at, opened_at FROM matters WHERE id = $1",
        )
        .bind(matter_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_app_error)?
        .ok_or_else(|| AppError::not_found(format!("Matter {} not found", matter_id)))?;

        let rows = sqlx::query_as::<_, AttributeRow>(
            "SELECT key, value FROM matter_attributes WHERE matter_id = $1",
        )
        .bind(matter_id)
        .fetch_all(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_app_error)?;

        let mut attributes = MatterAttributes::new();
        for row in rows {
            let key = row.key.clone();
            match row.into_pair() {
                Some((key, value)) => {
                    attributes.insert(key, value);
                }
                None => tracing::warn!(%matter_id, %key, "ignoring non-scalar matter attribute"),
            }
        }

        Ok(MatterContext {
            matter_id: matter.id,
            created_at: matter.created_at,
            opened_at: matter.opened_at,
            attributes,
        })
    }
}

/// Role grants from `user_roles`.
#[derive(Debug, Clone)]
pub struct PgRoleChecker {
    pool: Pool<Postgres>,
}

impl PgRoleChecker {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

impl RoleChecker for PgRoleChecker {
    async fn has_role(&self, user_id: i64, role: &str) -> Result<bool, AppError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM user_roles WHERE user_id = $1 AND role = $2)",
        )
        .bind(user_id)
        .bind(role)
        .fetch_one(&self.pool)
        .await
        .map_err(SqlxErrorExt::into_app_error)
    }
}
