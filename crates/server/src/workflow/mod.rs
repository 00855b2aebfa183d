//! Matter workflow and stage-gating engine.
//!
//! - `catalog`: template authoring, release and selection rules
//! - `due_date`: relative due-date resolution
//! - `conditions`: applicability/selection condition evaluation
//! - `activator`: pinning a template to a matter
//! - `lifecycle`: task transitions, evidence and approvals
//! - `gate`: stage completion and workflow advancement
//! - `ledger`: the append-only exception record
//! - `engine`: the async façade over a store and the collaborators

pub mod activator;
pub mod audit;
pub mod catalog;
pub mod collaborators;
pub mod conditions;
pub mod due_date;
pub mod engine;
pub mod events;
pub mod gate;
pub mod ledger;
pub mod lifecycle;
pub mod state;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use collaborators::{AttributeProvider, RoleChecker};
pub use conditions::{ApplicabilityError, AttributeSchema};
pub use engine::WorkflowEngine;
pub use events::{ChannelEventSink, EventSink, LogEventSink};
pub use ledger::{ApprovedException, SYSTEM_SKIP_REASON};
pub use state::{MatterWorkflowState, StepContext};
pub use store::{Committed, TemplateStore, WorkflowStore};
