//! Relative due-date resolution
//!
//! A task template may carry an anchor event and a day offset. The due date
//! is the anchor timestamp plus the offset in calendar days; when the anchor
//! event has not happened yet the due date stays unset and is retried on the
//! next stage evaluation.

use chrono::{DateTime, Duration, Utc};
use shared_types::DueDateAnchor;

/// Timestamps the anchors can be resolved against. `None` means the event
/// has not occurred (or the matter collaborator does not know it).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnchorContext {
    pub stage_started_at: Option<DateTime<Utc>>,
    pub task_created_at: Option<DateTime<Utc>>,
    pub matter_created_at: Option<DateTime<Utc>>,
    pub matter_opened_at: Option<DateTime<Utc>>,
}

impl AnchorContext {
    fn anchor_time(&self, anchor: DueDateAnchor) -> Option<DateTime<Utc>> {
        match anchor {
            DueDateAnchor::StageStarted => self.stage_started_at,
            DueDateAnchor::TaskCreated => self.task_created_at,
            DueDateAnchor::MatterCreated => self.matter_created_at,
            DueDateAnchor::MatterOpened => self.matter_opened_at,
        }
    }
}

/// Resolve a due date. Negative offsets count backwards from the anchor.
pub fn resolve(
    anchor: Option<DueDateAnchor>,
    relative_days: Option<i32>,
    context: &AnchorContext,
) -> Option<DateTime<Utc>> {
    let anchor = anchor?;
    let days = relative_days?;
    let base = context.anchor_time(anchor)?;
    base.checked_add_signed(Duration::days(i64::from(days)))
}
