use crate::common::*;
use axum::{http::StatusCode, Router};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

/// Draft a two-stage template over HTTP and release it. Returns its id.
async fn release_purchase_template(app: &Router) -> String {
    let (status, template) = post_json(
        app,
        "/api/workflow-templates",
        &json!({
            "key": "residential_purchase",
            "version": "1.0.0",
            "name": "Residential purchase",
            "practice_area": "real_estate",
            "is_default": true
        }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(template["released_at"], Value::Null);
    let template_id = template["id"].as_str().unwrap().to_string();

    let (status, intake) = post_json(
        app,
        &format!("/api/workflow-templates/{template_id}/stages"),
        &json!({
            "name": "Intake",
            "gate_type": "hard",
            "completion_criteria": "all_mandatory_tasks"
        }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(intake["sort_order"], 1);
    let intake_id = intake["id"].as_str().unwrap().to_string();

    for title in [IDENTITY_TASK, CONFLICT_TASK] {
        let (status, _) = post_json(
            app,
            &format!("/api/workflow-stages/{intake_id}/task-templates"),
            &json!({ "title": title }),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, mortgage) = post_json(
        app,
        &format!("/api/workflow-templates/{template_id}/stages"),
        &json!({
            "name": "Mortgage",
            "gate_type": "soft",
            "completion_criteria": "all_tasks",
            "applicability_conditions": { "has_mortgage": true }
        }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(mortgage["sort_order"], 2);

    let (status, released) = post_json(
        app,
        &format!("/api/workflow-templates/{template_id}/release"),
        &json!({}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(released["released_at"].is_string());

    template_id
}

#[tokio::test]
async fn released_templates_are_listed_and_frozen() {
    let (app, _pool, _guard) = test_app().await;
    let template_id = release_purchase_template(&app).await;

    let (status, listed) = get_json(&app, "/api/workflow-templates?practice_area=real_estate").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], template_id.as_str());

    let (status, definition) =
        get_json(&app, "/api/workflow-templates/by-key/residential_purchase").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(definition["stages"].as_array().unwrap().len(), 2);

    let (status, err) = post_json(
        &app,
        &format!("/api/workflow-templates/{template_id}/stages"),
        &json!({
            "name": "Late stage",
            "gate_type": "none",
            "completion_criteria": "all_tasks"
        }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["kind"], "TemplateImmutable");

    let (status, draft) = post_json(
        &app,
        &format!("/api/workflow-templates/{template_id}/versions"),
        &json!({ "version": "1.1.0" }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(draft["template"]["version"], "1.1.0");
    assert_eq!(draft["template"]["released_at"], Value::Null);
}

#[tokio::test]
async fn activation_gating_and_overrides_over_http() {
    let (app, pool, _guard) = test_app().await;
    let template_id = release_purchase_template(&app).await;
    let matter_id = seed_matter(&pool, &[("has_mortgage", json!(false))]).await;
    let activate_uri = format!("/api/matters/{matter_id}/workflow");
    let activation = json!({ "template_id": template_id, "version": "1.0.0" });

    let (status, err) = post_json(&app, &activate_uri, &activation, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["kind"], "Unauthorized");

    let (status, view) = post_json(&app, &activate_uri, &activation, Some(PARALEGAL)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(view["workflow"]["status"], "active");
    assert_eq!(view["stages"][0]["status"], "in_progress");
    assert_eq!(view["stages"][1]["status"], "skipped");
    let intake_id = view["stages"][0]["id"].as_str().unwrap().to_string();
    let mortgage_id = view["stages"][1]["id"].as_str().unwrap().to_string();

    let (status, err) = post_json(&app, &activate_uri, &activation, Some(PARALEGAL)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["kind"], "DuplicateWorkflow");

    let (status, skipped) = get_json(
        &app,
        &format!("/api/exceptions?object_type=stage&object_id={mortgage_id}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(skipped[0]["decision_source"], "system");

    let (status, tasks) = get_json(&app, &format!("/api/stages/{intake_id}/tasks")).await;
    assert_eq!(status, StatusCode::OK);
    let task_id = tasks
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["title"] == CONFLICT_TASK)
        .unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, err) = patch_json(
        &app,
        &format!("/api/tasks/{task_id}/status"),
        &json!({ "status": "skipped" }),
        Some(PARALEGAL),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["kind"], "InvalidException");

    let (status, task) = patch_json(
        &app,
        &format!("/api/tasks/{task_id}/status"),
        &json!({ "status": "completed" }),
        Some(PARALEGAL),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["status"], "completed");
    assert!(task["completed_at"].is_string());

    let force_uri = format!("/api/stages/{intake_id}/force-advance");
    let (status, err) = post_json(&app, &force_uri, &json!({}), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["kind"], "GateBlocked");

    let (status, stage) = post_json(
        &app,
        &force_uri,
        &json!({
            "exception": {
                "reason": "Identity confirmed by the lender's solicitor",
                "approver_id": SUPERVISOR
            }
        }),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stage["status"], "completed");
    assert!(stage["exception_id"].is_string());

    let (status, overrides) = get_json(
        &app,
        &format!("/api/exceptions?object_type=stage&object_id={intake_id}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overrides.as_array().unwrap().len(), 1);
    assert_eq!(overrides[0]["exception_type"], "gate_override");
    assert_eq!(overrides[0]["approved_by_id"], SUPERVISOR);

    let (status, view) = get_json(&app, &activate_uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["workflow"]["status"], "completed");
    assert_eq!(view["workflow"]["current_stage_id"], Value::Null);

    let (status, violations) = get_json(&app, &format!("{activate_uri}/audit")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(violations, json!([]));
}

#[tokio::test]
async fn malformed_identifiers_are_bad_requests() {
    let (app, _pool, _guard) = test_app().await;

    let (status, err) = get_json(&app, "/api/stages/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["kind"], "BadRequest");

    let (status, err) = get_json(&app, &format!("/api/stages/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["kind"], "NotFound");
}
