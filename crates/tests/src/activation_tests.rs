use std::sync::Arc;

use crate::common::*;
use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use server::workflow::{AttributeProvider, ChannelEventSink, SYSTEM_SKIP_REASON};
use shared_types::{
    AddTaskTemplateRequest, AppErrorKind, CompletionCriteria, ConditionExpr, DecisionSource,
    DueDateAnchor, ExceptionObjectType, ExceptionType, GateType, StageStatus, TaskSource,
    TaskStatus, WorkflowEventKind, WorkflowStatus,
};

#[tokio::test]
async fn activation_starts_first_stage_and_skips_inapplicable_ones() {
    let engine = memory_engine();
    let definition = conveyancing_template(&engine).await;
    let (matter_id, view) = activate_on_new_matter(&engine, &definition).await;

    assert_eq!(view.workflow.matter_id, matter_id);
    assert_eq!(view.workflow.workflow_template_id, definition.template.id);
    assert_eq!(view.workflow.workflow_version, "1.0.0");
    assert_eq!(view.workflow.status, WorkflowStatus::Active);
    assert_eq!(view.workflow.activated_by, PARALEGAL);

    let names: Vec<&str> = view.stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Intake", "Mortgage", "Completion"]);
    let (intake, mortgage, completion) = (&view.stages[0], &view.stages[1], &view.stages[2]);

    // Intake is running with its tasks instantiated.
    assert_eq!(intake.status, StageStatus::InProgress);
    assert!(intake.started_at.is_some());
    assert_eq!(view.workflow.current_stage_id, Some(intake.id));
    let tasks = engine.list_tasks(intake.id).await.unwrap();
    let titles: Vec<&str> = tasks.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec![IDENTITY_TASK, CONFLICT_TASK, WELCOME_TASK]);
    assert!(tasks
        .iter()
        .all(|t| t.source == TaskSource::Workflow && t.status == TaskStatus::Pending));
    assert!(titled(&tasks, IDENTITY_TASK).requires_verified_evidence);
    assert!(!titled(&tasks, WELCOME_TASK).is_mandatory);

    // Mortgage does not apply and is skipped by the system.
    assert_eq!(mortgage.status, StageStatus::Skipped);
    assert_eq!(mortgage.skipped_reason.as_deref(), Some(SYSTEM_SKIP_REASON));
    let exceptions = engine
        .list_exceptions(ExceptionObjectType::Stage, mortgage.id)
        .await
        .unwrap();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(Some(exceptions[0].id), mortgage.exception_id);
    assert_eq!(exceptions[0].exception_type, ExceptionType::Skipped);
    assert_eq!(exceptions[0].decision_source, DecisionSource::System);
    assert_eq!(exceptions[0].approved_by_id, None);
    assert!(engine.list_tasks(mortgage.id).await.unwrap().is_empty());

    // Completion waits with no tasks yet.
    assert_eq!(completion.status, StageStatus::Pending);
    assert!(completion.started_at.is_none());
    assert!(engine.list_tasks(completion.id).await.unwrap().is_empty());

    assert!(engine.audit_invariants(matter_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn applicable_optional_stage_stays_pending() {
    let engine = memory_engine();
    let definition = conveyancing_template(&engine).await;
    let matter_id = new_matter(&engine, &[("has_mortgage", true.into())]);

    let view = engine
        .activate(matter_id, definition.template.id, "1.0.0", PARALEGAL)
        .await
        .unwrap();
    assert_eq!(view.stages[1].status, StageStatus::Pending);
    assert!(view.stages[1].exception_id.is_none());
}

#[tokio::test]
async fn activating_twice_is_a_duplicate() {
    let engine = memory_engine();
    let definition = conveyancing_template(&engine).await;
    let (matter_id, view) = activate_on_new_matter(&engine, &definition).await;

    let err = engine
        .activate(matter_id, definition.template.id, "1.0.0", SUPERVISOR)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::DuplicateWorkflow);

    assert_eq!(engine.get_workflow(matter_id).await.unwrap(), view);
    assert_eq!(engine.store().workflow_count().unwrap(), 1);
}

#[tokio::test]
async fn only_released_active_templates_activate() {
    let engine = memory_engine();
    let drafted = draft(
        &engine,
        template_request("drafted", "1.0.0"),
        vec![stage("Only", GateType::None, CompletionCriteria::AllTasks).task(task("Task"))],
    )
    .await;
    let matter_id = new_matter(&engine, &[]);

    let err = engine
        .activate(matter_id, drafted.template.id, "1.0.0", PARALEGAL)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::BadRequest);

    let definition = conveyancing_template(&engine).await;
    engine
        .set_active(definition.template.id, false)
        .await
        .unwrap();
    let err = engine
        .activate(matter_id, definition.template.id, "1.0.0", PARALEGAL)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::BadRequest);
    assert_eq!(engine.store().workflow_count().unwrap(), 0);
}

#[tokio::test]
async fn version_must_match_the_template() {
    let engine = memory_engine();
    let definition = conveyancing_template(&engine).await;
    let matter_id = new_matter(&engine, &[]);

    let err = engine
        .activate(matter_id, definition.template.id, "2.0.0", PARALEGAL)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::BadRequest);
}

#[tokio::test]
async fn unknown_matter_or_template_is_not_found() {
    let engine = memory_engine();
    let definition = conveyancing_template(&engine).await;

    let err = engine
        .activate(uuid::Uuid::new_v4(), definition.template.id, "1.0.0", PARALEGAL)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::NotFound);

    let matter_id = new_matter(&engine, &[]);
    let err = engine
        .activate(matter_id, uuid::Uuid::new_v4(), "1.0.0", PARALEGAL)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::NotFound);
}

#[tokio::test]
async fn condition_errors_skip_the_stage() {
    let engine = memory_engine();
    let definition = released(
        &engine,
        template_request("odd_conditions", "1.0.0"),
        vec![
            stage("Unknown key", GateType::Hard, CompletionCriteria::AllTasks)
                .when("favourite_colour", ConditionExpr::Equals("blue".into()))
                .task(task("Never created")),
            stage("Missing attribute", GateType::Hard, CompletionCriteria::AllTasks)
                .when("is_leasehold", ConditionExpr::Equals(true.into()))
                .task(task("Never created either")),
            stage("Type mismatch", GateType::Hard, CompletionCriteria::AllTasks)
                .when("has_mortgage", ConditionExpr::Equals("yes".into()))
                .task(task("Still never created")),
            stage("Runs", GateType::Hard, CompletionCriteria::AllTasks).task(task("Created")),
        ],
    )
    .await;
    let (matter_id, view) = activate_on_new_matter(&engine, &definition).await;

    let statuses: Vec<StageStatus> = view.stages.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            StageStatus::Skipped,
            StageStatus::Skipped,
            StageStatus::Skipped,
            StageStatus::InProgress
        ]
    );
    assert_eq!(view.workflow.current_stage_id, Some(view.stages[3].id));
    assert!(engine.audit_invariants(matter_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn workflow_with_no_applicable_stage_completes_at_once() {
    let engine = memory_engine();
    let definition = released(
        &engine,
        template_request("mortgage_only", "1.0.0"),
        vec![stage("Mortgage", GateType::Soft, CompletionCriteria::AllTasks)
            .when("has_mortgage", ConditionExpr::Equals(true.into()))
            .task(task(MORTGAGE_TASK))],
    )
    .await;
    let (_, view) = activate_on_new_matter(&engine, &definition).await;

    assert_eq!(view.workflow.status, WorkflowStatus::Completed);
    assert!(view.workflow.completed_at.is_some());
    assert_eq!(view.workflow.current_stage_id, None);
}

#[tokio::test]
async fn workflow_stays_pinned_to_its_version() {
    let engine = memory_engine();
    let v1 = conveyancing_template(&engine).await;
    let (matter_id, _) = activate_on_new_matter(&engine, &v1).await;

    let v2 = engine
        .create_next_version(v1.template.id, "2.0.0")
        .await
        .unwrap();
    engine
        .add_stage(
            v2.template.id,
            stage("Post-completion", GateType::None, CompletionCriteria::AllTasks).stage,
        )
        .await
        .unwrap();
    engine.release(v2.template.id).await.unwrap();

    let view = engine.get_workflow(matter_id).await.unwrap();
    assert_eq!(view.workflow.workflow_version, "1.0.0");
    assert_eq!(view.workflow.workflow_template_id, v1.template.id);
    assert_eq!(view.stages.len(), 3);
}

#[tokio::test]
async fn due_dates_resolve_from_known_anchors() {
    let engine = memory_engine();
    let definition = released(
        &engine,
        template_request("anchored", "1.0.0"),
        vec![stage("Intake", GateType::Hard, CompletionCriteria::AllMandatoryTasks)
            .task(AddTaskTemplateRequest {
                due_date_anchor: Some(DueDateAnchor::MatterCreated),
                relative_due_days: Some(30),
                ..task("File searches")
            })
            .task(AddTaskTemplateRequest {
                due_date_anchor: Some(DueDateAnchor::StageStarted),
                relative_due_days: Some(2),
                ..task("Open file")
            })
            .task(task("No deadline"))],
    )
    .await;
    let (matter_id, view) = activate_on_new_matter(&engine, &definition).await;
    let matter = engine.attributes().get_attributes(matter_id).await.unwrap();
    let started_at = view.stages[0].started_at.unwrap();

    let tasks = engine.list_tasks(view.stages[0].id).await.unwrap();
    assert_eq!(
        titled(&tasks, "File searches").due_at,
        Some(matter.created_at.unwrap() + Duration::days(30))
    );
    assert_eq!(
        titled(&tasks, "Open file").due_at,
        Some(started_at + Duration::days(2))
    );
    assert_eq!(titled(&tasks, "No deadline").due_at, None);
}

#[tokio::test]
async fn undeterminable_due_dates_resolve_on_later_evaluation() {
    let engine = memory_engine();
    let definition = released(
        &engine,
        template_request("deferred", "1.0.0"),
        vec![stage("Intake", GateType::Hard, CompletionCriteria::AllMandatoryTasks)
            .task(AddTaskTemplateRequest {
                due_date_anchor: Some(DueDateAnchor::MatterOpened),
                relative_due_days: Some(7),
                ..task("Send engagement letter")
            })],
    )
    .await;
    let (matter_id, view) = activate_on_new_matter(&engine, &definition).await;
    let stage_id = view.stages[0].id;

    let tasks = engine.list_tasks(stage_id).await.unwrap();
    assert_eq!(tasks[0].due_at, None);

    let opened_at = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap();
    let mut matter = matter_context(matter_id, &[("has_mortgage", false.into())]);
    matter.opened_at = Some(opened_at);
    engine.attributes().upsert_matter(matter).unwrap();

    let stage = engine.evaluate(stage_id).await.unwrap();
    assert_eq!(stage.status, StageStatus::InProgress);
    let tasks = engine.list_tasks(stage_id).await.unwrap();
    assert_eq!(tasks[0].due_at, Some(opened_at + Duration::days(7)));
}

#[tokio::test]
async fn activation_publishes_stage_events() {
    let (sink, mut rx) = ChannelEventSink::new();
    let engine = memory_engine().with_event_sink(Arc::new(sink));
    let definition = conveyancing_template(&engine).await;
    let (matter_id, view) = activate_on_new_matter(&engine, &definition).await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|e| e.matter_id == matter_id && e.kind == WorkflowEventKind::StageTransition));

    let skipped = events
        .iter()
        .find(|e| e.stage_id == Some(view.stages[1].id))
        .unwrap();
    assert_eq!(skipped.from_status, "pending");
    assert_eq!(skipped.to_status, "skipped");

    let started = events
        .iter()
        .find(|e| e.stage_id == Some(view.stages[0].id))
        .unwrap();
    assert_eq!(started.from_status, "pending");
    assert_eq!(started.to_status, "in_progress");
}
