use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::workflow::AttributeKind;

/// Feature flags controlling which optional integrations are active.
///
/// Every field defaults to `false` so that a missing or incomplete config
/// file disables all optional features.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FeatureFlags {
    #[serde(default)]
    pub telemetry: bool,
}

fn default_approver_role() -> String {
    "supervising_attorney".to_string()
}

fn default_evaluation_retries() -> u32 {
    1
}

/// Tunables for the workflow engine, read from the `[workflow]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSettings {
    /// Role a user must hold to approve a skip, not-applicable or gate override.
    #[serde(default = "default_approver_role")]
    pub exception_approver_role: String,
    /// How many times a stage evaluation that lost a concurrent race is retried.
    #[serde(default = "default_evaluation_retries")]
    pub evaluation_retries: u32,
    /// Matter attribute keys accepted in applicability conditions, on top of
    /// the standard set.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeKind>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            exception_approver_role: default_approver_role(),
            evaluation_retries: default_evaluation_retries(),
            attributes: BTreeMap::new(),
        }
    }
}

/// Top-level config file structure matching `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub features: FeatureFlags,
    #[serde(default)]
    pub workflow: WorkflowSettings,
}
