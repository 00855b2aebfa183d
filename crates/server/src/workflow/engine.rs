use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared_types::{
    AddStageRequest, AddTaskTemplateRequest, AppError, CreateTemplateRequest, EvidenceItem,
    ExceptionObjectType, ExceptionPayload, InvariantViolation, MatterAttributes, MatterStage,
    Task, TaskException, TaskStatus, TemplateDefinition, UpdateStageRequest,
    UpdateTaskTemplateRequest, WorkflowSettings, WorkflowStage, WorkflowTaskTemplate,
    WorkflowTemplate, WorkflowView,
};
use uuid::Uuid;

use super::catalog;
use super::collaborators::{AttributeProvider, RoleChecker};
use super::conditions::AttributeSchema;
use super::events::{publish_all, EventSink, LogEventSink};
use super::ledger::{approve_exception, ApprovedException};
use super::state::{MatterWorkflowState, StepContext};
use super::store::{TemplateStore, WorkflowStore};

/// The workflow and stage-gating engine.
///
/// All state lives in the store; the engine loads one matter's aggregate
/// per mutation, applies a pure step under the matter's lock and publishes
/// the resulting events after commit.
pub struct WorkflowEngine<S, A, R> {
    store: S,
    attributes: A,
    roles: R,
    events: Arc<dyn EventSink>,
    settings: WorkflowSettings,
    schema: AttributeSchema,
}

impl<S, A, R> WorkflowEngine<S, A, R>
where
    S: TemplateStore + WorkflowStore,
    A: AttributeProvider,
    R: RoleChecker,
{
    pub fn new(store: S, attributes: A, roles: R, settings: WorkflowSettings) -> Self {
        let schema = AttributeSchema::with_extra(&settings.attributes);
        Self {
            store,
            attributes,
            roles,
            events: Arc::new(LogEventSink),
            settings,
            schema,
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn attributes(&self) -> &A {
        &self.attributes
    }

    pub fn roles(&self) -> &R {
        &self.roles
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    // ── Template catalog ─────────────────────────────────────────────

    pub async fn create_template(
        &self,
        req: CreateTemplateRequest,
    ) -> Result<WorkflowTemplate, AppError> {
        let version = catalog::parse_version(&req.version)?;
        let key = req.key.trim().to_string();
        let siblings = self.store.list_templates(Some(&key), None).await?;
        if siblings
            .iter()
            .any(|t| catalog::parse_version(&t.version).is_ok_and(|v| v == version))
        {
            return Err(AppError::conflict(format!(
                "Template {} already has version {}",
                key, version
            )));
        }
        let template = WorkflowTemplate {
            id: Uuid::new_v4(),
            key,
            version: version.to_string(),
            name: req.name,
            practice_area: req.practice_area,
            sub_types: req.sub_types,
            selection_conditions: req.selection_conditions,
            is_default: req.is_default,
            is_active: true,
            released_at: None,
            created_at: Utc::now(),
        };
        self.store.insert_template(&template).await?;
        tracing::info!(key = %template.key, version = %template.version, "template drafted");
        Ok(template)
    }

    pub async fn add_stage(
        &self,
        template_id: Uuid,
        req: AddStageRequest,
    ) -> Result<WorkflowStage, AppError> {
        let definition = self.definition(template_id).await?;
        catalog::ensure_draft(&definition.template)?;
        let sort_order = match req.sort_order {
            Some(order) => order,
            None => catalog::next_sort_order(definition.stages.iter().map(|s| s.stage.sort_order)),
        };
        if definition.stages.iter().any(|s| s.stage.sort_order == sort_order) {
            return Err(AppError::conflict(format!(
                "Sort order {} is already used in this template",
                sort_order
            )));
        }
        let stage = WorkflowStage {
            id: Uuid::new_v4(),
            template_id,
            name: req.name,
            sort_order,
            gate_type: req.gate_type,
            completion_criteria: req.completion_criteria,
            applicability_conditions: req.applicability_conditions,
            client_visible: req.client_visible,
        };
        self.store.insert_stage(&stage).await?;
        Ok(stage)
    }

    pub async fn update_stage(
        &self,
        stage_id: Uuid,
        req: UpdateStageRequest,
    ) -> Result<WorkflowStage, AppError> {
        let mut stage = self
            .store
            .find_template_stage(stage_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Template stage {} not found", stage_id)))?;
        let template = self.template(stage.template_id).await?;
        catalog::ensure_draft(&template)?;
        catalog::apply_stage_update(&mut stage, req);
        self.store.update_stage(&stage).await?;
        Ok(stage)
    }

    pub async fn add_task_template(
        &self,
        stage_id: Uuid,
        req: AddTaskTemplateRequest,
    ) -> Result<WorkflowTaskTemplate, AppError> {
        let stage = self
            .store
            .find_template_stage(stage_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Template stage {} not found", stage_id)))?;
        let definition = self.definition(stage.template_id).await?;
        catalog::ensure_draft(&definition.template)?;
        let siblings = definition
            .stage(stage_id)
            .map(|s| s.task_templates.as_slice())
            .unwrap_or_default();
        let sort_order = match req.sort_order {
            Some(order) => order,
            None => catalog::next_sort_order(siblings.iter().map(|t| t.sort_order)),
        };
        if siblings.iter().any(|t| t.sort_order == sort_order) {
            return Err(AppError::conflict(format!(
                "Sort order {} is already used in this stage",
                sort_order
            )));
        }
        let task = WorkflowTaskTemplate {
            id: Uuid::new_v4(),
            stage_id,
            title: req.title,
            description: req.description,
            sort_order,
            is_mandatory: req.is_mandatory,
            requires_evidence: req.requires_evidence,
            required_evidence_types: req.required_evidence_types,
            requires_verified_evidence: req.requires_verified_evidence,
            requires_approval: req.requires_approval,
            required_approver_role: req.required_approver_role,
            due_date_anchor: req.due_date_anchor,
            relative_due_days: req.relative_due_days,
        };
        self.store.insert_task_template(&task).await?;
        Ok(task)
    }

    pub async fn update_task_template(
        &self,
        task_template_id: Uuid,
        req: UpdateTaskTemplateRequest,
    ) -> Result<WorkflowTaskTemplate, AppError> {
        let mut task = self
            .store
            .find_task_template(task_template_id)
            .await?
            .ok_or_else(|| {
                AppError::not_found(format!("Task template {} not found", task_template_id))
            })?;
        let stage = self
            .store
            .find_template_stage(task.stage_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Template stage {} not found", task.stage_id)))?;
        let template = self.template(stage.template_id).await?;
        catalog::ensure_draft(&template)?;
        catalog::apply_task_template_update(&mut task, req);
        self.store.update_task_template(&task).await?;
        Ok(task)
    }

    /// Validate and release a draft. From here on its definition is frozen.
    pub async fn release(&self, template_id: Uuid) -> Result<WorkflowTemplate, AppError> {
        let definition = self.definition(template_id).await?;
        catalog::validate_release(&definition)?;
        let template = self.store.mark_released(template_id, Utc::now()).await?;
        tracing::info!(key = %template.key, version = %template.version, "template released");
        Ok(template)
    }

    pub async fn set_active(
        &self,
        template_id: Uuid,
        is_active: bool,
    ) -> Result<WorkflowTemplate, AppError> {
        self.template(template_id).await?;
        self.store.set_active(template_id, is_active).await
    }

    /// Start a new draft version from an existing template. The version must
    /// be higher than every existing version of the same key.
    pub async fn create_next_version(
        &self,
        template_id: Uuid,
        version: &str,
    ) -> Result<TemplateDefinition, AppError> {
        let source = self.definition(template_id).await?;
        let wanted = catalog::parse_version(version)?;
        let siblings = self
            .store
            .list_templates(Some(&source.template.key), None)
            .await?;
        for sibling in &siblings {
            let existing = catalog::parse_version(&sibling.version)?;
            if existing >= wanted {
                return Err(AppError::conflict(format!(
                    "Version {} must be higher than existing version {}",
                    wanted, existing
                )));
            }
        }
        let copy = catalog::copy_as_version(&source, &wanted.to_string(), Utc::now());
        self.store.insert_definition(&copy).await?;
        tracing::info!(key = %copy.template.key, version = %copy.template.version, "template version drafted");
        Ok(copy)
    }

    /// A template by key, at an exact version or the latest active release.
    pub async fn get_template(
        &self,
        key: &str,
        version: Option<&str>,
    ) -> Result<TemplateDefinition, AppError> {
        let candidates = self.store.list_templates(Some(key), None).await?;
        let found = match version {
            Some(v) => {
                let wanted = catalog::parse_version(v)?;
                candidates
                    .into_iter()
                    .find(|t| catalog::parse_version(&t.version).is_ok_and(|tv| tv == wanted))
            }
            None => catalog::latest_active(candidates),
        };
        let template = found.ok_or_else(|| {
            AppError::not_found(match version {
                Some(v) => format!("Template {} version {} not found", key, v),
                None => format!("No active release of template {}", key),
            })
        })?;
        self.definition(template.id).await
    }

    /// Released, active templates whose selection conditions hold for the
    /// given attributes, defaults first, newest version first.
    pub async fn list_applicable(
        &self,
        practice_area: &str,
        sub_type: Option<&str>,
        attributes: &MatterAttributes,
    ) -> Result<Vec<WorkflowTemplate>, AppError> {
        let templates = self.store.list_templates(None, Some(practice_area)).await?;
        Ok(catalog::select_applicable(
            templates,
            sub_type,
            attributes,
            &self.schema,
        ))
    }

    /// `list_applicable` using the attributes the matter collaborator holds.
    pub async fn list_applicable_for_matter(
        &self,
        practice_area: &str,
        sub_type: Option<&str>,
        matter_id: Uuid,
    ) -> Result<Vec<WorkflowTemplate>, AppError> {
        let matter = self.attributes.get_attributes(matter_id).await?;
        self.list_applicable(practice_area, sub_type, &matter.attributes)
            .await
    }

    // ── Matter workflows ─────────────────────────────────────────────

    /// Pin a released template version to a matter.
    pub async fn activate(
        &self,
        matter_id: Uuid,
        template_id: Uuid,
        version: &str,
        activated_by: i64,
    ) -> Result<WorkflowView, AppError> {
        let template = self.template(template_id).await?;
        let wanted = catalog::parse_version(version)?;
        if catalog::parse_version(&template.version)? != wanted {
            return Err(AppError::bad_request(format!(
                "Template {} is version {}, not {}",
                template.key, template.version, version
            )));
        }
        let definition = self.definition(template_id).await?;
        let matter = self.attributes.get_attributes(matter_id).await?;
        let cx = StepContext {
            matter: &matter,
            schema: &self.schema,
            now: Utc::now(),
        };
        let state = MatterWorkflowState::activate(definition, activated_by, &cx)?;
        let committed = self.store.insert_workflow(state).await?;
        publish_all(self.events.as_ref(), &committed.events);
        Ok(committed.value)
    }

    pub async fn update_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        actor: i64,
        exception: Option<ExceptionPayload>,
    ) -> Result<Task, AppError> {
        let current = self
            .store
            .find_task(task_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Task {} not found", task_id)))?;
        if current.status == status {
            tracing::debug!(%task_id, %status, "task already in requested status");
            return Ok(current);
        }
        let approved = match exception {
            Some(payload) if status.requires_exception() => Some(self.approve(&payload).await?),
            _ => None,
        };
        self.mutate(current.matter_id, |state, cx| {
            state.update_task_status(task_id, status, actor, approved.as_ref(), cx)
        })
        .await
    }

    pub async fn decide_approval(
        &self,
        task_id: Uuid,
        approver_id: i64,
        approve: bool,
    ) -> Result<Task, AppError> {
        let task = self
            .store
            .find_task(task_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Task {} not found", task_id)))?;
        if let Some(role) = task.required_approver_role.as_deref() {
            if !self.roles.has_role(approver_id, role).await? {
                return Err(AppError::forbidden(format!(
                    "User {} does not hold the '{}' role required to approve this task",
                    approver_id, role
                )));
            }
        }
        self.mutate(task.matter_id, |state, cx| {
            state.decide_approval(task_id, approver_id, approve, cx.now)
        })
        .await
    }

    pub async fn link_evidence(
        &self,
        task_id: Uuid,
        evidence_type: &str,
        description: Option<String>,
    ) -> Result<EvidenceItem, AppError> {
        let matter_id = self.matter_of_task(task_id).await?;
        self.mutate(matter_id, |state, cx| {
            state.link_evidence(task_id, evidence_type, description.clone(), cx.now)
        })
        .await
    }

    pub async fn create_manual_task(
        &self,
        matter_id: Uuid,
        title: &str,
        matter_stage_id: Option<Uuid>,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<Task, AppError> {
        self.mutate(matter_id, |state, cx| {
            state.create_manual_task(title, matter_stage_id, due_at, cx.now)
        })
        .await
    }

    /// Recompute a stage from its tasks and advance the workflow if it is done.
    pub async fn evaluate(&self, stage_id: Uuid) -> Result<MatterStage, AppError> {
        let matter_id = self.matter_of_stage(stage_id).await?;
        self.mutate(matter_id, |state, cx| state.evaluate_stage(stage_id, cx))
            .await
    }

    pub async fn force_advance(
        &self,
        stage_id: Uuid,
        exception: Option<ExceptionPayload>,
    ) -> Result<MatterStage, AppError> {
        let matter_id = self.matter_of_stage(stage_id).await?;
        let approved = match exception {
            Some(payload) => Some(self.approve(&payload).await?),
            None => None,
        };
        self.mutate(matter_id, |state, cx| {
            state.force_advance(stage_id, approved.as_ref(), cx)
        })
        .await
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn get_workflow(&self, matter_id: Uuid) -> Result<WorkflowView, AppError> {
        Ok(self.load(matter_id).await?.view())
    }

    pub async fn get_stage(&self, stage_id: Uuid) -> Result<MatterStage, AppError> {
        self.store
            .find_stage(stage_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Stage {} not found", stage_id)))
    }

    pub async fn list_tasks(&self, stage_id: Uuid) -> Result<Vec<Task>, AppError> {
        self.get_stage(stage_id).await?;
        self.store.list_stage_tasks(stage_id).await
    }

    pub async fn list_exceptions(
        &self,
        object_type: ExceptionObjectType,
        object_id: Uuid,
    ) -> Result<Vec<TaskException>, AppError> {
        self.store.list_exceptions(object_type, object_id).await
    }

    pub async fn audit_invariants(
        &self,
        matter_id: Uuid,
    ) -> Result<Vec<InvariantViolation>, AppError> {
        let violations = self.load(matter_id).await?.audit_invariants();
        if !violations.is_empty() {
            tracing::warn!(%matter_id, count = violations.len(), "workflow invariant violations found");
        }
        Ok(violations)
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn approve(&self, payload: &ExceptionPayload) -> Result<ApprovedException, AppError> {
        approve_exception(&self.roles, &self.settings.exception_approver_role, payload).await
    }

    async fn template(&self, template_id: Uuid) -> Result<WorkflowTemplate, AppError> {
        self.store
            .find_template(template_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Template {} not found", template_id)))
    }

    async fn definition(&self, template_id: Uuid) -> Result<TemplateDefinition, AppError> {
        self.store
            .load_definition(template_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Template {} not found", template_id)))
    }

    async fn load(&self, matter_id: Uuid) -> Result<MatterWorkflowState, AppError> {
        self.store.load_workflow(matter_id).await?.ok_or_else(|| {
            AppError::not_found(format!("Matter {} has no workflow", matter_id))
        })
    }

    async fn matter_of_task(&self, task_id: Uuid) -> Result<Uuid, AppError> {
        self.store
            .matter_for_task(task_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Task {} not found", task_id)))
    }

    async fn matter_of_stage(&self, stage_id: Uuid) -> Result<Uuid, AppError> {
        self.store
            .matter_for_stage(stage_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Stage {} not found", stage_id)))
    }

    /// Apply one engine step to a matter's aggregate under its lock. A lost
    /// race is retried up to `evaluation_retries` times with freshly loaded
    /// state before `ConcurrentUpdate` reaches the caller.
    async fn mutate<T, F>(&self, matter_id: Uuid, step: F) -> Result<T, AppError>
    where
        F: Fn(&mut MatterWorkflowState, &StepContext<'_>) -> Result<T, AppError> + Send + Sync,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            let matter = self.attributes.get_attributes(matter_id).await?;
            let cx = StepContext {
                matter: &matter,
                schema: &self.schema,
                now: Utc::now(),
            };
            match self
                .store
                .with_matter(matter_id, |state| step(state, &cx))
                .await
            {
                Ok(committed) => {
                    publish_all(self.events.as_ref(), &committed.events);
                    return Ok(committed.value);
                }
                Err(e) if e.is_concurrent_update() && attempt < self.settings.evaluation_retries => {
                    attempt += 1;
                    tracing::warn!(%matter_id, attempt, "concurrent update on matter workflow; retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
