//! In-process implementations of the store and collaborator traits.
//!
//! Each matter's aggregate is mutated on a copy and swapped in only when the
//! step succeeds, so a failed operation leaves nothing behind. Used by the
//! test suites and for embedding the engine without a database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use shared_types::{
    AppError, AttributeValue, EvidenceItem, ExceptionObjectType, MatterContext, MatterStage,
    StageDefinition, Task, TaskException, TemplateDefinition, WorkflowStage,
    WorkflowTaskTemplate, WorkflowTemplate, WorkflowView,
};
use uuid::Uuid;

use crate::workflow::catalog::ensure_draft;
use crate::workflow::{
    AttributeProvider, Committed, MatterWorkflowState, RoleChecker, TemplateStore, WorkflowStore,
};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, AppError> {
    mutex
        .lock()
        .map_err(|_| AppError::internal("in-memory store lock poisoned"))
}

#[derive(Debug, Default)]
struct Catalog {
    templates: HashMap<Uuid, WorkflowTemplate>,
    stages: HashMap<Uuid, WorkflowStage>,
    task_templates: HashMap<Uuid, WorkflowTaskTemplate>,
}

impl Catalog {
    fn draft(&self, template_id: Uuid) -> Result<&WorkflowTemplate, AppError> {
        let template = self
            .templates
            .get(&template_id)
            .ok_or_else(|| AppError::not_found(format!("Template {} not found", template_id)))?;
        ensure_draft(template)?;
        Ok(template)
    }

    fn draft_of_stage(&self, stage_id: Uuid) -> Result<&WorkflowTemplate, AppError> {
        let stage = self
            .stages
            .get(&stage_id)
            .ok_or_else(|| AppError::not_found(format!("Template stage {} not found", stage_id)))?;
        self.draft(stage.template_id)
    }

    fn check_stage_order(&self, stage: &WorkflowStage) -> Result<(), AppError> {
        let taken = self.stages.values().any(|s| {
            s.template_id == stage.template_id && s.sort_order == stage.sort_order && s.id != stage.id
        });
        if taken {
            return Err(AppError::conflict("This sort order is already used"));
        }
        Ok(())
    }

    fn check_task_order(&self, task: &WorkflowTaskTemplate) -> Result<(), AppError> {
        let taken = self.task_templates.values().any(|t| {
            t.stage_id == task.stage_id && t.sort_order == task.sort_order && t.id != task.id
        });
        if taken {
            return Err(AppError::conflict("This sort order is already used"));
        }
        Ok(())
    }

    fn check_unique_version(&self, template: &WorkflowTemplate) -> Result<(), AppError> {
        let taken = self
            .templates
            .values()
            .any(|t| t.key == template.key && t.version == template.version);
        if taken {
            return Err(AppError::conflict(
                "A template with this key and version already exists",
            ));
        }
        Ok(())
    }

    fn definition(&self, template_id: Uuid) -> Option<TemplateDefinition> {
        let template = self.templates.get(&template_id)?.clone();
        let stages = self
            .stages
            .values()
            .filter(|s| s.template_id == template_id)
            .map(|stage| StageDefinition {
                stage: stage.clone(),
                task_templates: self
                    .task_templates
                    .values()
                    .filter(|t| t.stage_id == stage.id)
                    .cloned()
                    .collect(),
            })
            .collect();
        let mut definition = TemplateDefinition { template, stages };
        definition.sort();
        Some(definition)
    }
}

// ── Store ────────────────────────────────────────────────────────────

/// Template catalog and matter workflows held in memory.
#[derive(Debug, Default)]
pub struct MemoryWorkflowStore {
    catalog: Mutex<Catalog>,
    workflows: Mutex<HashMap<Uuid, MatterWorkflowState>>,
    failing_commits: AtomicU32,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` per-matter commits fail with `ConcurrentUpdate`
    /// after the step has run, as if another writer got there first.
    pub fn fail_next_commits(&self, n: u32) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Mark an evidence item verified, as the external evidence workflow
    /// would. Verification does not by itself re-evaluate any stage.
    pub fn verify_evidence(
        &self,
        evidence_id: Uuid,
        verified_by_id: i64,
        method: &str,
        verified_at: DateTime<Utc>,
    ) -> Result<EvidenceItem, AppError> {
        let mut workflows = lock(&self.workflows)?;
        let item = workflows
            .values_mut()
            .flat_map(|state| state.evidence.iter_mut())
            .find(|e| e.id == evidence_id)
            .ok_or_else(|| AppError::not_found(format!("Evidence {} not found", evidence_id)))?;
        item.verified_at = Some(verified_at);
        item.verified_by_id = Some(verified_by_id);
        item.verification_method = Some(method.to_string());
        Ok(item.clone())
    }

    /// Number of stored workflows.
    pub fn workflow_count(&self) -> Result<usize, AppError> {
        Ok(lock(&self.workflows)?.len())
    }

    fn find_in_workflows<T>(
        &self,
        pick: impl Fn(&MatterWorkflowState) -> Option<T>,
    ) -> Result<Option<T>, AppError> {
        Ok(lock(&self.workflows)?.values().find_map(pick))
    }
}

impl TemplateStore for MemoryWorkflowStore {
    async fn insert_template(&self, template: &WorkflowTemplate) -> Result<(), AppError> {
        let mut catalog = lock(&self.catalog)?;
        catalog.check_unique_version(template)?;
        catalog.templates.insert(template.id, template.clone());
        Ok(())
    }

    async fn find_template(&self, template_id: Uuid) -> Result<Option<WorkflowTemplate>, AppError> {
        Ok(lock(&self.catalog)?.templates.get(&template_id).cloned())
    }

    async fn list_templates(
        &self,
        key: Option<&str>,
        practice_area: Option<&str>,
    ) -> Result<Vec<WorkflowTemplate>, AppError> {
        let catalog = lock(&self.catalog)?;
        let mut templates: Vec<WorkflowTemplate> = catalog
            .templates
            .values()
            .filter(|t| key.map_or(true, |k| t.key == k))
            .filter(|t| practice_area.map_or(true, |p| t.practice_area == p))
            .cloned()
            .collect();
        templates.sort_by(|a, b| a.key.cmp(&b.key).then(a.created_at.cmp(&b.created_at)));
        Ok(templates)
    }

    async fn load_definition(
        &self,
        template_id: Uuid,
    ) -> Result<Option<TemplateDefinition>, AppError> {
        Ok(lock(&self.catalog)?.definition(template_id))
    }

    async fn find_template_stage(&self, stage_id: Uuid) -> Result<Option<WorkflowStage>, AppError> {
        Ok(lock(&self.catalog)?.stages.get(&stage_id).cloned())
    }

    async fn find_task_template(
        &self,
        task_template_id: Uuid,
    ) -> Result<Option<WorkflowTaskTemplate>, AppError> {
        Ok(lock(&self.catalog)?
            .task_templates
            .get(&task_template_id)
            .cloned())
    }

    async fn insert_stage(&self, stage: &WorkflowStage) -> Result<(), AppError> {
        let mut catalog = lock(&self.catalog)?;
        catalog.draft(stage.template_id)?;
        catalog.check_stage_order(stage)?;
        catalog.stages.insert(stage.id, stage.clone());
        Ok(())
    }

    async fn update_stage(&self, stage: &WorkflowStage) -> Result<(), AppError> {
        let mut catalog = lock(&self.catalog)?;
        catalog.draft_of_stage(stage.id)?;
        catalog.check_stage_order(stage)?;
        catalog.stages.insert(stage.id, stage.clone());
        Ok(())
    }

    async fn insert_task_template(&self, task: &WorkflowTaskTemplate) -> Result<(), AppError> {
        let mut catalog = lock(&self.catalog)?;
        catalog.draft_of_stage(task.stage_id)?;
        catalog.check_task_order(task)?;
        catalog.task_templates.insert(task.id, task.clone());
        Ok(())
    }

    async fn update_task_template(&self, task: &WorkflowTaskTemplate) -> Result<(), AppError> {
        let mut catalog = lock(&self.catalog)?;
        let existing = catalog.task_templates.get(&task.id).ok_or_else(|| {
            AppError::not_found(format!("Task template {} not found", task.id))
        })?;
        catalog.draft_of_stage(existing.stage_id)?;
        catalog.check_task_order(task)?;
        catalog.task_templates.insert(task.id, task.clone());
        Ok(())
    }

    async fn mark_released(
        &self,
        template_id: Uuid,
        released_at: DateTime<Utc>,
    ) -> Result<WorkflowTemplate, AppError> {
        let mut catalog = lock(&self.catalog)?;
        catalog.draft(template_id)?;
        let template = catalog
            .templates
            .get_mut(&template_id)
            .ok_or_else(|| AppError::not_found(format!("Template {} not found", template_id)))?;
        template.released_at = Some(released_at);
        Ok(template.clone())
    }

    async fn set_active(
        &self,
        template_id: Uuid,
        is_active: bool,
    ) -> Result<WorkflowTemplate, AppError> {
        let mut catalog = lock(&self.catalog)?;
        let template = catalog
            .templates
            .get_mut(&template_id)
            .ok_or_else(|| AppError::not_found(format!("Template {} not found", template_id)))?;
        template.is_active = is_active;
        Ok(template.clone())
    }

    async fn insert_definition(&self, definition: &TemplateDefinition) -> Result<(), AppError> {
        let mut catalog = lock(&self.catalog)?;
        catalog.check_unique_version(&definition.template)?;
        catalog
            .templates
            .insert(definition.template.id, definition.template.clone());
        for def in &definition.stages {
            catalog.stages.insert(def.stage.id, def.stage.clone());
            for task in &def.task_templates {
                catalog.task_templates.insert(task.id, task.clone());
            }
        }
        Ok(())
    }
}

impl WorkflowStore for MemoryWorkflowStore {
    async fn insert_workflow(
        &self,
        mut state: MatterWorkflowState,
    ) -> Result<Committed<WorkflowView>, AppError> {
        let mut workflows = lock(&self.workflows)?;
        let matter_id = state.matter_id();
        if workflows.contains_key(&matter_id) {
            return Err(AppError::duplicate_workflow(format!(
                "Matter {} already has a workflow",
                matter_id
            )));
        }
        let changes = state.take_changes();
        let view = state.view();
        workflows.insert(matter_id, state);
        Ok(Committed {
            value: view,
            events: changes.events,
        })
    }

    async fn load_workflow(
        &self,
        matter_id: Uuid,
    ) -> Result<Option<MatterWorkflowState>, AppError> {
        Ok(lock(&self.workflows)?.get(&matter_id).cloned())
    }

    async fn matter_for_stage(&self, stage_id: Uuid) -> Result<Option<Uuid>, AppError> {
        self.find_in_workflows(|s| s.stage(stage_id).map(|_| s.matter_id()))
    }

    async fn matter_for_task(&self, task_id: Uuid) -> Result<Option<Uuid>, AppError> {
        self.find_in_workflows(|s| s.task(task_id).map(|t| t.matter_id))
    }

    async fn with_matter<T, F>(&self, matter_id: Uuid, apply: F) -> Result<Committed<T>, AppError>
    where
        F: FnOnce(&mut MatterWorkflowState) -> Result<T, AppError> + Send,
        T: Send,
    {
        let mut workflows = lock(&self.workflows)?;
        let mut draft = workflows
            .get(&matter_id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("Matter {} has no workflow", matter_id)))?;
        let value = apply(&mut draft)?;
        if self.take_injected_failure() {
            return Err(AppError::concurrent_update(
                "The workflow was modified concurrently; try again",
            ));
        }
        let changes = draft.take_changes();
        workflows.insert(matter_id, draft);
        Ok(Committed {
            value,
            events: changes.events,
        })
    }

    async fn find_stage(&self, stage_id: Uuid) -> Result<Option<MatterStage>, AppError> {
        self.find_in_workflows(|s| s.stage(stage_id).cloned())
    }

    async fn list_stage_tasks(&self, stage_id: Uuid) -> Result<Vec<Task>, AppError> {
        Ok(self
            .find_in_workflows(|s| s.stage(stage_id).map(|_| s.stage_tasks(stage_id)))?
            .unwrap_or_default())
    }

    async fn find_task(&self, task_id: Uuid) -> Result<Option<Task>, AppError> {
        self.find_in_workflows(|s| s.task(task_id).cloned())
    }

    async fn list_exceptions(
        &self,
        object_type: ExceptionObjectType,
        object_id: Uuid,
    ) -> Result<Vec<TaskException>, AppError> {
        let workflows = lock(&self.workflows)?;
        let mut found: Vec<TaskException> = workflows
            .values()
            .flat_map(|s| s.exceptions_for(object_type, object_id))
            .collect();
        found.sort_by_key(|e| e.approved_at);
        Ok(found)
    }
}

// ── Collaborators ────────────────────────────────────────────────────

/// Matter attributes keyed by matter id.
#[derive(Debug, Default)]
pub struct MemoryAttributeProvider {
    matters: Mutex<HashMap<Uuid, MatterContext>>,
}

impl MemoryAttributeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_matter(&self, matter: MatterContext) -> Result<(), AppError> {
        lock(&self.matters)?.insert(matter.matter_id, matter);
        Ok(())
    }

    pub fn set_attribute(
        &self,
        matter_id: Uuid,
        key: &str,
        value: impl Into<AttributeValue>,
    ) -> Result<(), AppError> {
        let mut matters = lock(&self.matters)?;
        let matter = matters
            .get_mut(&matter_id)
            .ok_or_else(|| AppError::not_found(format!("Matter {} not found", matter_id)))?;
        matter.attributes.insert(key.to_string(), value.into());
        Ok(())
    }
}

impl AttributeProvider for MemoryAttributeProvider {
    async fn get_attributes(&self, matter_id: Uuid) -> Result<MatterContext, AppError> {
        lock(&self.matters)?
            .get(&matter_id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("Matter {} not found", matter_id)))
    }
}

/// Role grants keyed by user id.
#[derive(Debug, Default)]
pub struct MemoryRoleChecker {
    grants: Mutex<HashSet<(i64, String)>>,
}

impl MemoryRoleChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, user_id: i64, role: &str) -> Result<(), AppError> {
        lock(&self.grants)?.insert((user_id, role.to_string()));
        Ok(())
    }
}

impl RoleChecker for MemoryRoleChecker {
    async fn has_role(&self, user_id: i64, role: &str) -> Result<bool, AppError> {
        Ok(lock(&self.grants)?.contains(&(user_id, role.to_string())))
    }
}
