//! Postgres implementations of the workflow store and collaborator traits.

pub mod collaborators;
pub mod matter_workflow;
pub mod rows;
pub mod template;

use sqlx::{Pool, Postgres};

pub use collaborators::{PgAttributeProvider, PgRoleChecker};

/// Template catalog and matter workflows backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgWorkflowStore {
    pool: Pool<Postgres>,
}

impl PgWorkflowStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}
