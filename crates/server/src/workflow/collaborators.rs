use shared_types::{AppError, MatterContext};
use uuid::Uuid;

// ── Traits ───────────────────────────────────────────────────────────

/// Supplies matter attributes and lifecycle timestamps. Owned by the
/// matter-management side of the platform; the engine only reads.
#[allow(async_fn_in_trait)]
pub trait AttributeProvider: Send + Sync {
    /// Current attributes of a matter. Unknown matters are `NotFound`.
    async fn get_attributes(&self, matter_id: Uuid) -> Result<MatterContext, AppError>;
}

/// Answers whether a user holds a role. Identity and role assignment live
/// outside the engine.
#[allow(async_fn_in_trait)]
pub trait RoleChecker: Send + Sync {
    async fn has_role(&self, user_id: i64, role: &str) -> Result<bool, AppError>;
}
