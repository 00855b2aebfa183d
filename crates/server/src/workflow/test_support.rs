//! Fixtures shared by the engine's unit tests.

use chrono::{DateTime, TimeZone, Utc};
use shared_types::{
    CompletionCriteria, ConditionSet, GateType, MatterContext, StageDefinition,
    TemplateDefinition, WorkflowStage, WorkflowTaskTemplate, WorkflowTemplate,
};
use uuid::Uuid;

use super::conditions::AttributeSchema;
use super::state::{MatterWorkflowState, StepContext};

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
}

pub fn schema() -> AttributeSchema {
    AttributeSchema::standard()
}

pub fn matter() -> MatterContext {
    let mut matter = MatterContext::new(Uuid::from_u128(0x5eed));
    matter.created_at = Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
    matter.attributes.insert("has_mortgage".into(), false.into());
    matter
}

pub fn step<'a>(matter: &'a MatterContext, schema: &'a AttributeSchema) -> StepContext<'a> {
    StepContext {
        matter,
        schema,
        now: fixed_now(),
    }
}

pub fn task_template(title: &str, is_mandatory: bool) -> WorkflowTaskTemplate {
    WorkflowTaskTemplate {
        id: Uuid::new_v4(),
        stage_id: Uuid::nil(),
        title: title.to_string(),
        description: None,
        sort_order: 0,
        is_mandatory,
        requires_evidence: false,
        required_evidence_types: Vec::new(),
        requires_verified_evidence: false,
        requires_approval: false,
        required_approver_role: None,
        due_date_anchor: None,
        relative_due_days: None,
    }
}

pub fn stage(
    name: &str,
    gate_type: GateType,
    completion_criteria: CompletionCriteria,
    applicability_conditions: ConditionSet,
    task_templates: Vec<WorkflowTaskTemplate>,
) -> StageDefinition {
    StageDefinition {
        stage: WorkflowStage {
            id: Uuid::new_v4(),
            template_id: Uuid::nil(),
            name: name.to_string(),
            sort_order: 0,
            gate_type,
            completion_criteria,
            applicability_conditions,
            client_visible: true,
        },
        task_templates,
    }
}

/// A released template whose stages and task templates are numbered in
/// the order given.
pub fn definition(stages: Vec<StageDefinition>) -> TemplateDefinition {
    let template = WorkflowTemplate {
        id: Uuid::new_v4(),
        key: "residential_purchase".into(),
        version: "1.0.0".into(),
        name: "Residential purchase".into(),
        practice_area: "real_estate".into(),
        sub_types: None,
        selection_conditions: ConditionSet::new(),
        is_default: true,
        is_active: true,
        released_at: Some(fixed_now()),
        created_at: fixed_now(),
    };
    let stages = stages
        .into_iter()
        .enumerate()
        .map(|(i, mut def)| {
            def.stage.template_id = template.id;
            def.stage.sort_order = i as i32 + 1;
            for (j, task) in def.task_templates.iter_mut().enumerate() {
                task.stage_id = def.stage.id;
                task.sort_order = j as i32 + 1;
            }
            def
        })
        .collect();
    TemplateDefinition { template, stages }
}

/// One hard-gated stage with a mandatory and an optional task, activated.
pub fn single_stage_state() -> MatterWorkflowState {
    let definition = definition(vec![stage(
        "Intake",
        GateType::Hard,
        CompletionCriteria::AllMandatoryTasks,
        ConditionSet::new(),
        vec![
            task_template("Verify client identity", true),
            task_template("Send welcome letter", false),
        ],
    )]);
    let matter = matter();
    let schema = schema();
    let mut state = MatterWorkflowState::activate(definition, 1, &step(&matter, &schema))
        .expect("activation succeeds");
    state.take_changes();
    state
}
