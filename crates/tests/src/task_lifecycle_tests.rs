use crate::common::*;
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use shared_types::{
    AddTaskTemplateRequest, AppErrorKind, ApprovalStatus, CompletionCriteria, DecisionSource,
    ExceptionObjectType, ExceptionPayload, ExceptionType, GateType, StageStatus, TaskSource,
    TaskStatus, TemplateDefinition,
};
use uuid::Uuid;

/// Intake (hard) with the given tasks, followed by a Closing stage.
async fn intake_template(
    engine: &MemoryEngine,
    key: &str,
    tasks: Vec<AddTaskTemplateRequest>,
) -> TemplateDefinition {
    let mut intake = stage("Intake", GateType::Hard, CompletionCriteria::AllMandatoryTasks);
    intake.tasks = tasks;
    released(
        engine,
        template_request(key, "1.0.0"),
        vec![
            intake,
            stage("Closing", GateType::None, CompletionCriteria::AllMandatoryTasks)
                .task(task("Close file")),
        ],
    )
    .await
}

#[tokio::test]
async fn verified_evidence_gates_completion_and_advances_the_stage() {
    let engine = memory_engine();
    let definition = conveyancing_template(&engine).await;
    let (matter_id, view) = activate_on_new_matter(&engine, &definition).await;
    let intake_id = view.stages[0].id;
    let completion_id = view.stages[2].id;
    let tasks = engine.list_tasks(intake_id).await.unwrap();
    let identity = titled(&tasks, IDENTITY_TASK).id;
    let conflict = titled(&tasks, CONFLICT_TASK).id;

    engine
        .update_task_status(conflict, TaskStatus::Completed, PARALEGAL, None)
        .await
        .unwrap();
    let evidence = engine
        .link_evidence(identity, "passport", Some("Scanned passport".into()))
        .await
        .unwrap();
    assert_eq!(evidence.task_id, identity);
    assert!(evidence.verified_at.is_none());

    let err = engine
        .update_task_status(identity, TaskStatus::Completed, PARALEGAL, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::GateUnsatisfied);
    assert!(err.field_errors.contains_key("verified_evidence"));
    assert_eq!(
        engine.get_stage(intake_id).await.unwrap().status,
        StageStatus::InProgress
    );

    engine
        .store()
        .verify_evidence(evidence.id, SUPERVISOR, "manual_review", Utc::now())
        .unwrap();
    let done = engine
        .update_task_status(identity, TaskStatus::Completed, PARALEGAL, None)
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.completed_by_id, Some(PARALEGAL));
    assert!(done.completed_at.is_some());

    // The optional welcome task is still pending; Intake completes anyway,
    // Mortgage stays skipped and Completion starts with its tasks.
    let view = engine.get_workflow(matter_id).await.unwrap();
    assert_eq!(view.stages[0].status, StageStatus::Completed);
    assert!(view.stages[0].completed_at.is_some());
    assert_eq!(view.stages[1].status, StageStatus::Skipped);
    assert_eq!(view.stages[2].status, StageStatus::InProgress);
    assert_eq!(view.workflow.current_stage_id, Some(completion_id));

    let completion_tasks = engine.list_tasks(completion_id).await.unwrap();
    assert_eq!(completion_tasks.len(), 1);
    assert_eq!(completion_tasks[0].title, REGISTER_TASK);
    let started_at = view.stages[2].started_at.unwrap();
    assert_eq!(
        completion_tasks[0].due_at,
        Some(started_at + Duration::days(5))
    );
    assert!(engine.audit_invariants(matter_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn skipping_requires_an_approved_exception() {
    let engine = memory_engine();
    let definition = conveyancing_template(&engine).await;
    let (_, view) = activate_on_new_matter(&engine, &definition).await;
    let tasks = engine.list_tasks(view.stages[0].id).await.unwrap();
    let conflict = titled(&tasks, CONFLICT_TASK).id;

    let err = engine
        .update_task_status(conflict, TaskStatus::Skipped, PARALEGAL, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::InvalidException);

    let err = engine
        .update_task_status(conflict, TaskStatus::Skipped, PARALEGAL, Some(exception("   ")))
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::InvalidException);

    let unauthorized = ExceptionPayload {
        reason: "Existing client".into(),
        approver_id: PARALEGAL,
    };
    let err = engine
        .update_task_status(conflict, TaskStatus::Skipped, PARALEGAL, Some(unauthorized))
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::InvalidException);

    // None of the rejected attempts left a trace.
    assert!(engine
        .list_exceptions(ExceptionObjectType::Task, conflict)
        .await
        .unwrap()
        .is_empty());

    let skipped = engine
        .update_task_status(
            conflict,
            TaskStatus::Skipped,
            PARALEGAL,
            Some(exception("  Existing client, checked last month ")),
        )
        .await
        .unwrap();
    assert_eq!(skipped.status, TaskStatus::Skipped);

    let exceptions = engine
        .list_exceptions(ExceptionObjectType::Task, conflict)
        .await
        .unwrap();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(skipped.exception_id, Some(exceptions[0].id));
    assert_eq!(exceptions[0].exception_type, ExceptionType::Skipped);
    assert_eq!(exceptions[0].decision_source, DecisionSource::User);
    assert_eq!(exceptions[0].approved_by_id, Some(SUPERVISOR));
    assert_eq!(exceptions[0].reason, "Existing client, checked last month");
}

#[tokio::test]
async fn not_applicable_records_its_own_exception_type() {
    let engine = memory_engine();
    let definition = conveyancing_template(&engine).await;
    let (matter_id, view) = activate_on_new_matter(&engine, &definition).await;
    let tasks = engine.list_tasks(view.stages[0].id).await.unwrap();
    let welcome = titled(&tasks, WELCOME_TASK).id;

    let task = engine
        .update_task_status(
            welcome,
            TaskStatus::NotApplicable,
            PARALEGAL,
            Some(exception("Client declined the welcome pack")),
        )
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::NotApplicable);

    let exceptions = engine
        .list_exceptions(ExceptionObjectType::Task, welcome)
        .await
        .unwrap();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].exception_type, ExceptionType::NotApplicable);
    assert!(engine.audit_invariants(matter_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn skipped_mandatory_tasks_resolve_the_stage() {
    let engine = memory_engine();
    let definition = intake_template(
        &engine,
        "skip_all",
        vec![task("Collect documents"), task("Check identity")],
    )
    .await;
    let (matter_id, view) = activate_on_new_matter(&engine, &definition).await;
    let tasks = engine.list_tasks(view.stages[0].id).await.unwrap();

    for t in &tasks {
        engine
            .update_task_status(t.id, TaskStatus::Skipped, PARALEGAL, Some(exception("Repeat client")))
            .await
            .unwrap();
    }

    let view = engine.get_workflow(matter_id).await.unwrap();
    assert_eq!(view.stages[0].status, StageStatus::Completed);
    // Resolved by skips, so no gate override was needed.
    assert!(view.stages[0].exception_id.is_none());
    assert_eq!(view.stages[1].status, StageStatus::InProgress);
    assert!(engine.audit_invariants(matter_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn reopening_clears_the_active_exception_but_keeps_the_record() {
    let engine = memory_engine();
    let definition = conveyancing_template(&engine).await;
    let (matter_id, view) = activate_on_new_matter(&engine, &definition).await;
    let tasks = engine.list_tasks(view.stages[0].id).await.unwrap();
    let conflict = titled(&tasks, CONFLICT_TASK).id;

    engine
        .update_task_status(conflict, TaskStatus::Skipped, PARALEGAL, Some(exception("Repeat client")))
        .await
        .unwrap();
    let reopened = engine
        .update_task_status(conflict, TaskStatus::Pending, PARALEGAL, None)
        .await
        .unwrap();
    assert_eq!(reopened.status, TaskStatus::Pending);
    assert_eq!(reopened.exception_id, None);

    let exceptions = engine
        .list_exceptions(ExceptionObjectType::Task, conflict)
        .await
        .unwrap();
    assert_eq!(exceptions.len(), 1);
    assert!(engine.audit_invariants(matter_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn tasks_of_a_completed_stage_cannot_be_reopened() {
    let engine = memory_engine();
    let definition = intake_template(&engine, "reopen_late", vec![task("Only task")]).await;
    let (_, view) = activate_on_new_matter(&engine, &definition).await;
    let only = engine.list_tasks(view.stages[0].id).await.unwrap()[0].id;

    engine
        .update_task_status(only, TaskStatus::Skipped, PARALEGAL, Some(exception("Not needed")))
        .await
        .unwrap();
    assert_eq!(
        engine.get_stage(view.stages[0].id).await.unwrap().status,
        StageStatus::Completed
    );

    let err = engine
        .update_task_status(only, TaskStatus::Pending, PARALEGAL, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::Conflict);
}

#[tokio::test]
async fn completed_is_terminal() {
    let engine = memory_engine();
    let definition = conveyancing_template(&engine).await;
    let (_, view) = activate_on_new_matter(&engine, &definition).await;
    let tasks = engine.list_tasks(view.stages[0].id).await.unwrap();
    let conflict = titled(&tasks, CONFLICT_TASK).id;

    engine
        .update_task_status(conflict, TaskStatus::InProgress, PARALEGAL, None)
        .await
        .unwrap();
    engine
        .update_task_status(conflict, TaskStatus::Completed, PARALEGAL, None)
        .await
        .unwrap();

    for to in [TaskStatus::Pending, TaskStatus::InProgress, TaskStatus::Skipped] {
        let err = engine
            .update_task_status(conflict, to, PARALEGAL, Some(exception("Undo")))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AppErrorKind::BadRequest, "completed -> {to}");
    }
}

#[tokio::test]
async fn requesting_the_current_status_changes_nothing() {
    let engine = memory_engine();
    let definition = conveyancing_template(&engine).await;
    let (_, view) = activate_on_new_matter(&engine, &definition).await;
    let before = engine.list_tasks(view.stages[0].id).await.unwrap()[1].clone();

    let after = engine
        .update_task_status(before.id, TaskStatus::Pending, PARALEGAL, None)
        .await
        .unwrap();
    assert_eq!(after, before);
}

#[tokio::test]
async fn skipping_a_skipped_task_again_is_a_no_op() {
    let engine = memory_engine();
    let definition = conveyancing_template(&engine).await;
    let (_, view) = activate_on_new_matter(&engine, &definition).await;
    let tasks = engine.list_tasks(view.stages[0].id).await.unwrap();
    let conflict = titled(&tasks, CONFLICT_TASK).id;
    let skipped = engine
        .update_task_status(
            conflict,
            TaskStatus::Skipped,
            PARALEGAL,
            Some(exception("Existing client")),
        )
        .await
        .unwrap();

    // The repeated request is not re-approved, so an approver without the
    // role does not turn it into an error.
    let unauthorized = ExceptionPayload {
        reason: "Existing client".into(),
        approver_id: PARALEGAL,
    };
    let again = engine
        .update_task_status(conflict, TaskStatus::Skipped, PARALEGAL, Some(unauthorized))
        .await
        .unwrap();
    assert_eq!(again, skipped);
    assert_eq!(
        engine
            .list_exceptions(ExceptionObjectType::Task, conflict)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let engine = memory_engine();
    let err = engine
        .update_task_status(Uuid::new_v4(), TaskStatus::Completed, PARALEGAL, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::NotFound);
}

#[tokio::test]
async fn approval_gates_completion() {
    let engine = memory_engine();
    let definition = intake_template(
        &engine,
        "approvals",
        vec![AddTaskTemplateRequest {
            requires_approval: true,
            required_approver_role: Some(CONVEYANCER_ROLE.into()),
            ..task("Approve report on title")
        }],
    )
    .await;
    let (_, view) = activate_on_new_matter(&engine, &definition).await;
    let report = engine.list_tasks(view.stages[0].id).await.unwrap()[0].clone();
    assert_eq!(report.approval_status, ApprovalStatus::Pending);

    let err = engine
        .update_task_status(report.id, TaskStatus::Completed, PARALEGAL, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::GateUnsatisfied);
    assert!(err.field_errors.contains_key("approval"));

    let err = engine
        .decide_approval(report.id, PARALEGAL, true)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::Forbidden);

    let rejected = engine
        .decide_approval(report.id, SUPERVISOR, false)
        .await
        .unwrap();
    assert_eq!(rejected.approval_status, ApprovalStatus::Rejected);
    let err = engine
        .update_task_status(report.id, TaskStatus::Completed, PARALEGAL, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::GateUnsatisfied);

    let approved = engine
        .decide_approval(report.id, SUPERVISOR, true)
        .await
        .unwrap();
    assert_eq!(approved.approval_status, ApprovalStatus::Approved);
    assert_eq!(approved.approved_by_id, Some(SUPERVISOR));
    assert!(approved.approved_at.is_some());

    let done = engine
        .update_task_status(report.id, TaskStatus::Completed, PARALEGAL, None)
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);

    let err = engine
        .decide_approval(report.id, SUPERVISOR, false)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::Conflict);
}

#[tokio::test]
async fn approval_without_a_role_requirement_accepts_any_user() {
    let engine = memory_engine();
    let definition = intake_template(
        &engine,
        "open_approvals",
        vec![AddTaskTemplateRequest {
            requires_approval: true,
            ..task("Agree fee estimate")
        }],
    )
    .await;
    let (_, view) = activate_on_new_matter(&engine, &definition).await;
    let estimate = engine.list_tasks(view.stages[0].id).await.unwrap()[0].id;

    let approved = engine
        .decide_approval(estimate, PARALEGAL, true)
        .await
        .unwrap();
    assert_eq!(approved.approval_status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn tasks_without_approval_reject_decisions() {
    let engine = memory_engine();
    let definition = conveyancing_template(&engine).await;
    let (_, view) = activate_on_new_matter(&engine, &definition).await;
    let tasks = engine.list_tasks(view.stages[0].id).await.unwrap();
    let conflict = titled(&tasks, CONFLICT_TASK);
    assert_eq!(conflict.approval_status, ApprovalStatus::NotRequired);

    let err = engine
        .decide_approval(conflict.id, SUPERVISOR, true)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::BadRequest);
}

#[tokio::test]
async fn required_evidence_types_must_all_be_linked() {
    let engine = memory_engine();
    let definition = intake_template(
        &engine,
        "evidence_types",
        vec![AddTaskTemplateRequest {
            requires_evidence: true,
            required_evidence_types: vec!["contract".into(), "searches".into()],
            ..task("Exchange contracts")
        }],
    )
    .await;
    let (_, view) = activate_on_new_matter(&engine, &definition).await;
    let exchange = engine.list_tasks(view.stages[0].id).await.unwrap()[0].id;

    let err = engine
        .update_task_status(exchange, TaskStatus::Completed, PARALEGAL, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::GateUnsatisfied);
    assert!(err.field_errors.contains_key("evidence"));
    assert!(err.field_errors.contains_key("evidence_types"));

    engine.link_evidence(exchange, "contract", None).await.unwrap();
    let err = engine
        .update_task_status(exchange, TaskStatus::Completed, PARALEGAL, None)
        .await
        .unwrap_err();
    assert!(!err.field_errors.contains_key("evidence"));
    assert!(err.field_errors["evidence_types"].contains("searches"));

    engine.link_evidence(exchange, "searches", None).await.unwrap();
    let done = engine
        .update_task_status(exchange, TaskStatus::Completed, PARALEGAL, None)
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
}

#[tokio::test]
async fn evidence_links_only_to_open_known_tasks() {
    let engine = memory_engine();
    let definition = conveyancing_template(&engine).await;
    let (_, view) = activate_on_new_matter(&engine, &definition).await;
    let tasks = engine.list_tasks(view.stages[0].id).await.unwrap();
    let conflict = titled(&tasks, CONFLICT_TASK).id;

    let err = engine
        .link_evidence(Uuid::new_v4(), "passport", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::NotFound);

    engine
        .update_task_status(conflict, TaskStatus::Completed, PARALEGAL, None)
        .await
        .unwrap();
    let err = engine
        .link_evidence(conflict, "report", None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::Conflict);
}

#[tokio::test]
async fn manual_tasks_never_gate_a_stage() {
    let engine = memory_engine();
    let definition = intake_template(&engine, "manual", vec![task("Only task")]).await;
    let (matter_id, view) = activate_on_new_matter(&engine, &definition).await;
    let intake_id = view.stages[0].id;

    let manual = engine
        .create_manual_task(matter_id, "  Call the lender  ", Some(intake_id), None)
        .await
        .unwrap();
    assert_eq!(manual.source, TaskSource::Manual);
    assert_eq!(manual.title, "Call the lender");
    assert!(!manual.is_mandatory);
    assert_eq!(manual.matter_stage_id, Some(intake_id));

    let tasks = engine.list_tasks(intake_id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[1].id, manual.id);

    engine
        .update_task_status(tasks[0].id, TaskStatus::Completed, PARALEGAL, None)
        .await
        .unwrap();
    let intake = engine.get_stage(intake_id).await.unwrap();
    assert_eq!(intake.status, StageStatus::Completed);

    // Completing the manual task afterwards is still allowed.
    let done = engine
        .update_task_status(manual.id, TaskStatus::Completed, PARALEGAL, None)
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
}

#[tokio::test]
async fn manual_tasks_need_a_workflow_and_a_known_stage() {
    let engine = memory_engine();
    let definition = conveyancing_template(&engine).await;
    let (matter_id, _) = activate_on_new_matter(&engine, &definition).await;

    let loose = engine
        .create_manual_task(matter_id, "Chase searches", None, Some(Utc::now()))
        .await
        .unwrap();
    assert_eq!(loose.matter_stage_id, None);
    assert!(loose.due_at.is_some());

    let err = engine
        .create_manual_task(matter_id, "Orphan", Some(Uuid::new_v4()), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::NotFound);

    let err = engine
        .create_manual_task(matter_id, "   ", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::BadRequest);

    let no_workflow = new_matter(&engine, &[]);
    let err = engine
        .create_manual_task(no_workflow, "Chase searches", None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, AppErrorKind::NotFound);
}
