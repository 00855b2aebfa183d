//! Template catalog rules: release validation, selection ordering and
//! version copies. Persistence goes through `TemplateStore`.

use chrono::{DateTime, Utc};
use semver::Version;
use shared_types::{
    AppError, MatterAttributes, StageDefinition, TemplateDefinition, UpdateStageRequest,
    UpdateTaskTemplateRequest, WorkflowStage, WorkflowTaskTemplate, WorkflowTemplate,
};
use uuid::Uuid;

use super::conditions::{is_applicable, AttributeSchema};

/// Parse a template version as a semantic version. Leading zeros and
/// missing parts are rejected.
pub fn parse_version(version: &str) -> Result<Version, AppError> {
    Version::parse(version.trim())
        .map_err(|e| AppError::bad_request(format!("Invalid version '{version}': {e}")))
}

pub fn ensure_draft(template: &WorkflowTemplate) -> Result<(), AppError> {
    if template.is_released() {
        return Err(AppError::template_immutable(format!(
            "Template {} {} is released; publish a new version instead",
            template.key, template.version
        )));
    }
    Ok(())
}

/// Check a draft is complete enough to release: at least one stage, stage
/// sort orders 1..n without gaps, task sort orders 1..n per stage, and a
/// parseable version.
pub fn validate_release(definition: &TemplateDefinition) -> Result<(), AppError> {
    ensure_draft(&definition.template)?;
    parse_version(&definition.template.version)?;
    if definition.stages.is_empty() {
        return Err(AppError::bad_request("A template needs at least one stage"));
    }
    let stage_orders: Vec<i32> = definition.stages.iter().map(|s| s.stage.sort_order).collect();
    if !is_gapless(&stage_orders) {
        return Err(AppError::bad_request(format!(
            "Stage sort orders must run 1..{} without gaps; got {:?}",
            stage_orders.len(),
            stage_orders
        )));
    }
    for stage in &definition.stages {
        let task_orders: Vec<i32> = stage.task_templates.iter().map(|t| t.sort_order).collect();
        if !is_gapless(&task_orders) {
            return Err(AppError::bad_request(format!(
                "Task sort orders in stage '{}' must run 1..{} without gaps; got {:?}",
                stage.stage.name,
                task_orders.len(),
                task_orders
            )));
        }
    }
    Ok(())
}

/// `orders` (already sorted) is exactly 1, 2, .., n.
fn is_gapless(orders: &[i32]) -> bool {
    orders
        .iter()
        .enumerate()
        .all(|(i, order)| usize::try_from(*order).is_ok_and(|o| o == i + 1))
}

/// The sort order a new child gets when the caller does not pick one.
pub fn next_sort_order(existing: impl Iterator<Item = i32>) -> i32 {
    existing.max().unwrap_or(0) + 1
}

/// Released, active templates matching the sub-type and selection
/// conditions, defaults first, then newest version first.
pub fn select_applicable(
    templates: Vec<WorkflowTemplate>,
    sub_type: Option<&str>,
    attributes: &MatterAttributes,
    schema: &AttributeSchema,
) -> Vec<WorkflowTemplate> {
    let mut applicable: Vec<(Version, WorkflowTemplate)> = templates
        .into_iter()
        .filter(|t| t.is_released() && t.is_active)
        .filter(|t| t.applies_to_sub_type(sub_type))
        .filter(|t| {
            is_applicable(
                &t.selection_conditions,
                attributes,
                schema,
                &format!("template {} {}", t.key, t.version),
            )
        })
        .filter_map(|t| match Version::parse(&t.version) {
            Ok(v) => Some((v, t)),
            Err(e) => {
                tracing::warn!(template = %t.key, error = %e, "skipping template with bad version");
                None
            }
        })
        .collect();
    applicable.sort_by(|(va, a), (vb, b)| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| vb.cmp(va))
    });
    applicable.into_iter().map(|(_, t)| t).collect()
}

/// The newest released, active template among `templates`.
pub fn latest_active(templates: Vec<WorkflowTemplate>) -> Option<WorkflowTemplate> {
    templates
        .into_iter()
        .filter(|t| t.is_released() && t.is_active)
        .filter_map(|t| Version::parse(&t.version).ok().map(|v| (v, t)))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, t)| t)
}

/// Copy a definition into a new draft version with fresh ids. The source
/// definition is not modified.
pub fn copy_as_version(
    source: &TemplateDefinition,
    version: &str,
    now: DateTime<Utc>,
) -> TemplateDefinition {
    let template = WorkflowTemplate {
        id: Uuid::new_v4(),
        version: version.to_string(),
        released_at: None,
        created_at: now,
        ..source.template.clone()
    };
    let stages = source
        .stages
        .iter()
        .map(|def| {
            let stage = WorkflowStage {
                id: Uuid::new_v4(),
                template_id: template.id,
                ..def.stage.clone()
            };
            let task_templates = def
                .task_templates
                .iter()
                .map(|tt| WorkflowTaskTemplate {
                    id: Uuid::new_v4(),
                    stage_id: stage.id,
                    ..tt.clone()
                })
                .collect();
            StageDefinition {
                stage,
                task_templates,
            }
        })
        .collect();
    TemplateDefinition { template, stages }
}

pub fn apply_stage_update(stage: &mut WorkflowStage, update: UpdateStageRequest) {
    if let Some(name) = update.name {
        stage.name = name;
    }
    if let Some(gate_type) = update.gate_type {
        stage.gate_type = gate_type;
    }
    if let Some(criteria) = update.completion_criteria {
        stage.completion_criteria = criteria;
    }
    if let Some(conditions) = update.applicability_conditions {
        stage.applicability_conditions = conditions;
    }
    if let Some(client_visible) = update.client_visible {
        stage.client_visible = client_visible;
    }
}

pub fn apply_task_template_update(task: &mut WorkflowTaskTemplate, update: UpdateTaskTemplateRequest) {
    if let Some(title) = update.title {
        task.title = title;
    }
    if update.description.is_some() {
        task.description = update.description;
    }
    if let Some(v) = update.is_mandatory {
        task.is_mandatory = v;
    }
    if let Some(v) = update.requires_evidence {
        task.requires_evidence = v;
    }
    if let Some(v) = update.required_evidence_types {
        task.required_evidence_types = v;
    }
    if let Some(v) = update.requires_verified_evidence {
        task.requires_verified_evidence = v;
    }
    if let Some(v) = update.requires_approval {
        task.requires_approval = v;
    }
    if update.required_approver_role.is_some() {
        task.required_approver_role = update.required_approver_role;
    }
    if update.due_date_anchor.is_some() {
        task.due_date_anchor = update.due_date_anchor;
    }
    if update.relative_due_days.is_some() {
        task.relative_due_days = update.relative_due_days;
    }
}
