use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use serde_json::Value;
use server::memory::{MemoryAttributeProvider, MemoryRoleChecker, MemoryWorkflowStore};
use server::db::PgEngine;
use server::workflow::{AttributeProvider, RoleChecker, TemplateStore, WorkflowEngine, WorkflowStore};
use shared_types::{
    AddStageRequest, AddTaskTemplateRequest, AttributeValue, CompletionCriteria, ConditionExpr,
    ConditionSet, CreateTemplateRequest, ExceptionPayload, GateType, MatterContext, Task,
    TemplateDefinition, WorkflowSettings, WorkflowView,
};
use sqlx::{Pool, Postgres};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower::ServiceExt;
use uuid::Uuid;

// ── In-memory engine ─────────────────────────────────────────────────

pub type MemoryEngine =
    WorkflowEngine<MemoryWorkflowStore, MemoryAttributeProvider, MemoryRoleChecker>;

/// Holds the exception approver role and the conveyancer role.
pub const SUPERVISOR: i64 = 100;
/// Holds no roles.
pub const PARALEGAL: i64 = 200;
pub const CONVEYANCER_ROLE: &str = "conveyancer";

pub const IDENTITY_TASK: &str = "Verify client identity";
pub const CONFLICT_TASK: &str = "Run conflict check";
pub const WELCOME_TASK: &str = "Send welcome pack";
pub const MORTGAGE_TASK: &str = "Review mortgage offer";
pub const REGISTER_TASK: &str = "Register title";

pub fn memory_engine() -> MemoryEngine {
    memory_engine_with(WorkflowSettings::default())
}

pub fn memory_engine_with(settings: WorkflowSettings) -> MemoryEngine {
    let roles = MemoryRoleChecker::new();
    roles
        .grant(SUPERVISOR, &settings.exception_approver_role)
        .unwrap();
    roles.grant(SUPERVISOR, CONVEYANCER_ROLE).unwrap();
    WorkflowEngine::new(
        MemoryWorkflowStore::new(),
        MemoryAttributeProvider::new(),
        roles,
        settings,
    )
}

/// Register a matter created ten days ago with the given attributes.
pub fn new_matter(engine: &MemoryEngine, attributes: &[(&str, AttributeValue)]) -> Uuid {
    let matter = matter_context(Uuid::new_v4(), attributes);
    let id = matter.matter_id;
    engine.attributes().upsert_matter(matter).unwrap();
    id
}

pub fn matter_context(matter_id: Uuid, attributes: &[(&str, AttributeValue)]) -> MatterContext {
    let mut matter = MatterContext::new(matter_id);
    matter.created_at = Some(Utc::now() - Duration::days(10));
    for (key, value) in attributes {
        matter.attributes.insert(key.to_string(), value.clone());
    }
    matter
}

pub fn exception(reason: &str) -> ExceptionPayload {
    ExceptionPayload {
        reason: reason.to_string(),
        approver_id: SUPERVISOR,
    }
}

// ── Template fixtures ────────────────────────────────────────────────

/// A stage request together with the task templates to add to it.
pub struct StageFixture {
    pub stage: AddStageRequest,
    pub tasks: Vec<AddTaskTemplateRequest>,
}

impl StageFixture {
    pub fn when(mut self, key: &str, expr: ConditionExpr) -> Self {
        self.stage
            .applicability_conditions
            .insert(key.to_string(), expr);
        self
    }

    pub fn task(mut self, task: AddTaskTemplateRequest) -> Self {
        self.tasks.push(task);
        self
    }
}

pub fn stage(name: &str, gate_type: GateType, criteria: CompletionCriteria) -> StageFixture {
    StageFixture {
        stage: AddStageRequest {
            name: name.to_string(),
            sort_order: None,
            gate_type,
            completion_criteria: criteria,
            applicability_conditions: ConditionSet::new(),
            client_visible: true,
        },
        tasks: Vec::new(),
    }
}

/// A mandatory task template with no preconditions.
pub fn task(title: &str) -> AddTaskTemplateRequest {
    AddTaskTemplateRequest {
        title: title.to_string(),
        description: None,
        sort_order: None,
        is_mandatory: true,
        requires_evidence: false,
        required_evidence_types: Vec::new(),
        requires_verified_evidence: false,
        requires_approval: false,
        required_approver_role: None,
        due_date_anchor: None,
        relative_due_days: None,
    }
}

pub fn optional_task(title: &str) -> AddTaskTemplateRequest {
    AddTaskTemplateRequest {
        is_mandatory: false,
        ..task(title)
    }
}

pub fn template_request(key: &str, version: &str) -> CreateTemplateRequest {
    CreateTemplateRequest {
        key: key.to_string(),
        version: version.to_string(),
        name: format!("{key} {version}"),
        practice_area: "real_estate".to_string(),
        sub_types: None,
        selection_conditions: ConditionSet::new(),
        is_default: false,
    }
}

/// Create a draft with the given stages and return its definition.
pub async fn draft<S, A, R>(
    engine: &WorkflowEngine<S, A, R>,
    req: CreateTemplateRequest,
    stages: Vec<StageFixture>,
) -> TemplateDefinition
where
    S: TemplateStore + WorkflowStore,
    A: AttributeProvider,
    R: RoleChecker,
{
    let key = req.key.clone();
    let version = req.version.clone();
    let template = engine.create_template(req).await.unwrap();
    for fixture in stages {
        let stage = engine.add_stage(template.id, fixture.stage).await.unwrap();
        for task in fixture.tasks {
            engine.add_task_template(stage.id, task).await.unwrap();
        }
    }
    engine.get_template(&key, Some(&version)).await.unwrap()
}

/// Create and release a template with the given stages.
pub async fn released<S, A, R>(
    engine: &WorkflowEngine<S, A, R>,
    req: CreateTemplateRequest,
    stages: Vec<StageFixture>,
) -> TemplateDefinition
where
    S: TemplateStore + WorkflowStore,
    A: AttributeProvider,
    R: RoleChecker,
{
    let key = req.key.clone();
    let version = req.version.clone();
    let definition = draft(engine, req, stages).await;
    engine.release(definition.template.id).await.unwrap();
    engine.get_template(&key, Some(&version)).await.unwrap()
}

/// Intake (hard, all mandatory), Mortgage (soft, all tasks, only when the
/// matter has a mortgage) and Completion (no gate).
pub fn conveyancing_stages() -> Vec<StageFixture> {
    vec![
        stage("Intake", GateType::Hard, CompletionCriteria::AllMandatoryTasks)
            .task(AddTaskTemplateRequest {
                requires_verified_evidence: true,
                ..task(IDENTITY_TASK)
            })
            .task(task(CONFLICT_TASK))
            .task(optional_task(WELCOME_TASK)),
        stage("Mortgage", GateType::Soft, CompletionCriteria::AllTasks)
            .when("has_mortgage", ConditionExpr::Equals(true.into()))
            .task(task(MORTGAGE_TASK)),
        stage("Completion", GateType::None, CompletionCriteria::AllMandatoryTasks).task(
            AddTaskTemplateRequest {
                due_date_anchor: Some(shared_types::DueDateAnchor::StageStarted),
                relative_due_days: Some(5),
                ..task(REGISTER_TASK)
            },
        ),
    ]
}

pub async fn conveyancing_template(engine: &MemoryEngine) -> TemplateDefinition {
    released(
        engine,
        template_request("residential_purchase", "1.0.0"),
        conveyancing_stages(),
    )
    .await
}

/// Activate `definition` on a fresh matter without a mortgage.
pub async fn activate_on_new_matter(
    engine: &MemoryEngine,
    definition: &TemplateDefinition,
) -> (Uuid, WorkflowView) {
    let matter_id = new_matter(engine, &[("has_mortgage", false.into())]);
    let view = engine
        .activate(
            matter_id,
            definition.template.id,
            &definition.template.version,
            PARALEGAL,
        )
        .await
        .unwrap();
    (matter_id, view)
}

pub fn titled<'a>(tasks: &'a [Task], title: &str) -> &'a Task {
    tasks
        .iter()
        .find(|t| t.title == title)
        .unwrap_or_else(|| panic!("no task titled {title}"))
}

// ── Postgres-backed router ───────────────────────────────────────────

/// Global mutex ensuring tests run sequentially against the shared database.
static TEST_MUTEX: std::sync::LazyLock<Mutex<()>> = std::sync::LazyLock::new(|| Mutex::new(()));

/// Build a router backed by a real Postgres pool, with empty workflow
/// tables and the supervisor's roles seeded. The returned guard must be
/// held for the duration of the test.
pub async fn test_app() -> (Router, Pool<Postgres>, tokio::sync::MutexGuard<'static, ()>) {
    let guard = TEST_MUTEX.lock().await;

    let _ = dotenvy::dotenv();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .expect("TEST_DATABASE_URL or DATABASE_URL must be set for tests");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    sqlx::query(
        "TRUNCATE task_exceptions, evidence_items, workflow_tasks, matter_stages, matter_workflows, \
         workflow_task_templates, workflow_stages, workflow_templates, matter_attributes, matters, \
         user_roles CASCADE",
    )
    .execute(&pool)
    .await
    .expect("Failed to truncate");

    sqlx::query("INSERT INTO user_roles (user_id, role) VALUES ($1, 'supervising_attorney'), ($1, $2)")
        .bind(SUPERVISOR)
        .bind(CONVEYANCER_ROLE)
        .execute(&pool)
        .await
        .expect("Failed to seed roles");

    let state = server::db::AppState::new(pool.clone(), WorkflowSettings::default());
    let router = server::rest::api_router().with_state(state);

    (router, pool, guard)
}

/// The Postgres-backed engine over `pool`.
pub fn pg_engine(pool: &Pool<Postgres>, settings: WorkflowSettings) -> Arc<PgEngine> {
    server::db::AppState::new(pool.clone(), settings).engine
}

/// Insert a matter with JSON-valued attributes.
pub async fn seed_matter(pool: &Pool<Postgres>, attributes: &[(&str, Value)]) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO matters (id) VALUES ($1)")
        .bind(id)
        .execute(pool)
        .await
        .expect("Failed to seed matter");
    for (key, value) in attributes {
        sqlx::query("INSERT INTO matter_attributes (matter_id, key, value) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(*key)
            .bind(sqlx::types::Json(value))
            .execute(pool)
            .await
            .expect("Failed to seed matter attribute");
    }
    id
}

/// POST JSON to a route, optionally as a user.
pub async fn post_json(
    app: &Router,
    uri: &str,
    body: &Value,
    actor: Option<i64>,
) -> (StatusCode, Value) {
    send_json(app, Method::POST, uri, Some(body), actor).await
}

/// PATCH JSON to a route, optionally as a user.
pub async fn patch_json(
    app: &Router,
    uri: &str,
    body: &Value,
    actor: Option<i64>,
) -> (StatusCode, Value) {
    send_json(app, Method::PATCH, uri, Some(body), actor).await
}

pub async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    send_json(app, Method::GET, uri, None, None).await
}

async fn send_json(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<&Value>,
    actor: Option<i64>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = actor {
        builder = builder.header("x-user-id", user.to_string());
    }
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app
        .clone()
        .oneshot(req)
        .await
        .expect("Failed to send request");

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");

    let body: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::String(
            String::from_utf8_lossy(&body_bytes).to_string(),
        ))
    };

    (status, body)
}
