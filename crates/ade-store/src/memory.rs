// InMemoryStore - process-local persistence adapter
//
// Backs the WorkflowStore port with lock-free maps. Preserves the port's
// transactional semantics: CAS-guarded workflow writes, the one-non-terminal-
// task-per-(workflow, stage) invariant, and message-id idempotency.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use ade_core::{
    AdeError, AdeResult, AgentRecord, AgentTask, Platform, PlatformSurface, SurfaceType,
    TaskStatus, Workflow, WorkflowDefinition, WorkflowEvent, WorkflowStore,
};

/// In-memory store
#[derive(Default)]
pub struct InMemoryStore {
    workflows: DashMap<String, Workflow>,
    tasks: DashMap<String, AgentTask>,
    task_ids_by_message: DashMap<String, String>,
    platforms: DashMap<String, Platform>,
    surfaces: DashMap<(String, SurfaceType), PlatformSurface>,
    definitions: DashMap<String, WorkflowDefinition>,
    agents: DashMap<String, AgentRecord>,
    events: Mutex<Vec<WorkflowEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn insert_workflow(&self, workflow: &Workflow) -> AdeResult<()> {
        if self.workflows.contains_key(&workflow.id) {
            return Err(AdeError::Conflict(format!(
                "workflow {} already exists",
                workflow.id
            )));
        }
        self.workflows.insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn get_workflow(&self, workflow_id: &str) -> AdeResult<Option<Workflow>> {
        Ok(self.workflows.get(workflow_id).map(|w| w.clone()))
    }

    async fn compare_and_swap_workflow(
        &self,
        workflow: &Workflow,
        expected_version: u64,
    ) -> AdeResult<()> {
        let mut entry = self.workflows.get_mut(&workflow.id).ok_or_else(|| {
            AdeError::NotFound(format!("workflow {} does not exist", workflow.id))
        })?;
        if entry.version != expected_version {
            return Err(AdeError::Conflict(format!(
                "workflow {} is at version {}, expected {}",
                workflow.id, entry.version, expected_version
            )));
        }
        let mut updated = workflow.clone();
        updated.version = expected_version + 1;
        updated.updated_at = Utc::now();
        *entry = updated;
        Ok(())
    }

    async fn insert_task(&self, task: &AgentTask) -> AdeResult<bool> {
        let message_id = task.envelope.message_id.clone();
        if self.task_ids_by_message.contains_key(&message_id) {
            debug!(message_id = %message_id, "duplicate envelope replay ignored");
            return Ok(false);
        }

        let clash = self.tasks.iter().any(|entry| {
            entry.workflow_id == task.workflow_id
                && entry.stage == task.stage
                && !entry.status.is_terminal()
        });
        if clash {
            return Err(AdeError::Conflict(format!(
                "workflow {} already has a non-terminal task for stage {}",
                task.workflow_id, task.stage
            )));
        }

        self.tasks.insert(task.task_id.clone(), task.clone());
        self.task_ids_by_message
            .insert(message_id, task.task_id.clone());
        Ok(true)
    }

    async fn get_task(&self, task_id: &str) -> AdeResult<Option<AgentTask>> {
        Ok(self.tasks.get(task_id).map(|t| t.clone()))
    }

    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> AdeResult<()> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| AdeError::NotFound(format!("task {} does not exist", task_id)))?;
        if entry.status.is_terminal() {
            return Err(AdeError::Conflict(format!(
                "task {} is already terminal ({:?})",
                task_id, entry.status
            )));
        }
        entry.status = status;
        entry.updated_at = Utc::now();
        if status == TaskStatus::Dispatched {
            entry.dispatched_at = Some(entry.updated_at);
        }
        Ok(())
    }

    async fn tasks_in_status(&self, status: TaskStatus) -> AdeResult<Vec<AgentTask>> {
        Ok(self
            .tasks
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.clone())
            .collect())
    }

    async fn task_by_message_id(&self, message_id: &str) -> AdeResult<Option<AgentTask>> {
        let task_id = match self.task_ids_by_message.get(message_id) {
            Some(id) => id.clone(),
            None => return Ok(None),
        };
        Ok(self.tasks.get(&task_id).map(|t| t.clone()))
    }

    async fn insert_platform(&self, platform: &Platform) -> AdeResult<()> {
        self.platforms.insert(platform.id.clone(), platform.clone());
        Ok(())
    }

    async fn get_platform(&self, platform_id: &str) -> AdeResult<Option<Platform>> {
        Ok(self.platforms.get(platform_id).map(|p| p.clone()))
    }

    async fn list_platforms(&self) -> AdeResult<Vec<Platform>> {
        Ok(self.platforms.iter().map(|p| p.clone()).collect())
    }

    async fn upsert_surface(&self, surface: &PlatformSurface) -> AdeResult<()> {
        self.surfaces.insert(
            (surface.platform_id.clone(), surface.surface_type),
            surface.clone(),
        );
        Ok(())
    }

    async fn get_surface(
        &self,
        platform_id: &str,
        surface_type: SurfaceType,
    ) -> AdeResult<Option<PlatformSurface>> {
        Ok(self
            .surfaces
            .get(&(platform_id.to_string(), surface_type))
            .map(|s| s.clone()))
    }

    async fn list_surfaces(&self, platform_id: &str) -> AdeResult<Vec<PlatformSurface>> {
        Ok(self
            .surfaces
            .iter()
            .filter(|s| s.platform_id == platform_id)
            .map(|s| s.clone())
            .collect())
    }

    async fn insert_definition(&self, definition: &WorkflowDefinition) -> AdeResult<()> {
        self.definitions
            .insert(definition.id.clone(), definition.clone());
        Ok(())
    }

    async fn get_definition(
        &self,
        definition_id: &str,
    ) -> AdeResult<Option<WorkflowDefinition>> {
        Ok(self.definitions.get(definition_id).map(|d| d.clone()))
    }

    async fn update_definition(&self, definition: &WorkflowDefinition) -> AdeResult<()> {
        let mut entry = self.definitions.get_mut(&definition.id).ok_or_else(|| {
            AdeError::NotFound(format!("definition {} does not exist", definition.id))
        })?;
        let mut updated = definition.clone();
        updated.version = entry.version + 1;
        updated.updated_at = Utc::now();
        *entry = updated;
        Ok(())
    }

    async fn delete_definition(&self, definition_id: &str) -> AdeResult<()> {
        self.definitions.remove(definition_id);
        Ok(())
    }

    async fn list_definitions(
        &self,
        platform_id: &str,
        enabled_only: bool,
    ) -> AdeResult<Vec<WorkflowDefinition>> {
        Ok(self
            .definitions
            .iter()
            .filter(|d| d.platform_id == platform_id && (!enabled_only || d.enabled))
            .map(|d| d.clone())
            .collect())
    }

    async fn upsert_agent(&self, agent: &AgentRecord) -> AdeResult<()> {
        self.agents.insert(agent.agent_id.clone(), agent.clone());
        Ok(())
    }

    async fn agents_by_type(&self, agent_type: &str) -> AdeResult<Vec<AgentRecord>> {
        Ok(self
            .agents
            .iter()
            .filter(|a| a.agent_type == agent_type)
            .map(|a| a.clone())
            .collect())
    }

    async fn list_agents(&self) -> AdeResult<Vec<AgentRecord>> {
        Ok(self.agents.iter().map(|a| a.clone()).collect())
    }

    async fn append_event(&self, event: &WorkflowEvent) -> AdeResult<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    async fn events_for_workflow(&self, workflow_id: &str) -> AdeResult<Vec<WorkflowEvent>> {
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ade_core::{
        AgentEnvelope, Constraints, CreateWorkflowRequest, EnvelopeMetadata, EnvelopeStatus,
        Priority, TraceContext, WorkflowContext, ENVELOPE_VERSION,
    };
    use std::collections::HashMap;

    fn workflow() -> Workflow {
        Workflow::new(
            &CreateWorkflowRequest {
                workflow_type: "app".to_string(),
                name: "hello".to_string(),
                platform_id: None,
                workflow_definition_id: None,
                input_data: serde_json::json!({}),
            },
            None,
        )
    }

    fn envelope(workflow_id: &str, stage: &str, message_id: &str) -> AgentEnvelope {
        AgentEnvelope {
            message_id: message_id.to_string(),
            task_id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            agent_type: "scaffold".to_string(),
            priority: Priority::Medium,
            status: EnvelopeStatus::Pending,
            constraints: Constraints::default(),
            retry_count: 0,
            payload: serde_json::Map::new(),
            metadata: EnvelopeMetadata {
                created_at: Utc::now(),
                created_by: "test".to_string(),
                envelope_version: ENVELOPE_VERSION.to_string(),
            },
            trace: TraceContext {
                trace_id: "t".to_string(),
                span_id: "s".to_string(),
                parent_span_id: None,
            },
            workflow_context: WorkflowContext {
                workflow_type: "app".to_string(),
                workflow_name: "hello".to_string(),
                current_stage: stage.to_string(),
                stage_outputs: HashMap::new(),
                surface_context: None,
            },
        }
    }

    #[tokio::test]
    async fn test_cas_happy_path() {
        let store = InMemoryStore::new();
        let mut wf = workflow();
        store.insert_workflow(&wf).await.unwrap();

        wf.current_stage = "scaffolding".to_string();
        store.compare_and_swap_workflow(&wf, 0).await.unwrap();

        let stored = store.get_workflow(&wf.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.current_stage, "scaffolding");
    }

    #[tokio::test]
    async fn test_cas_conflict_on_stale_version() {
        let store = InMemoryStore::new();
        let mut wf = workflow();
        store.insert_workflow(&wf).await.unwrap();
        store.compare_and_swap_workflow(&wf, 0).await.unwrap();

        // Second writer still holds version 0.
        wf.progress = 50;
        let err = store.compare_and_swap_workflow(&wf, 0).await.unwrap_err();
        assert!(matches!(err, AdeError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_duplicate_workflow_insert_rejected() {
        let store = InMemoryStore::new();
        let wf = workflow();
        store.insert_workflow(&wf).await.unwrap();
        assert!(store.insert_workflow(&wf).await.is_err());
    }

    #[tokio::test]
    async fn test_task_message_id_idempotency() {
        let store = InMemoryStore::new();
        let task = AgentTask::pending(envelope("wf-1", "scaffolding", "m-1"));
        assert!(store.insert_task(&task).await.unwrap());

        // Replaying the same envelope does not create a second task.
        let replay = AgentTask::pending(envelope("wf-1", "scaffolding", "m-1"));
        assert!(!store.insert_task(&replay).await.unwrap());
        assert_eq!(
            store
                .tasks_in_status(TaskStatus::Pending)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_one_non_terminal_task_per_stage() {
        let store = InMemoryStore::new();
        let first = AgentTask::pending(envelope("wf-1", "scaffolding", "m-1"));
        store.insert_task(&first).await.unwrap();

        let second = AgentTask::pending(envelope("wf-1", "scaffolding", "m-2"));
        let err = store.insert_task(&second).await.unwrap_err();
        assert!(matches!(err, AdeError::Conflict(_)));

        // Once the first task is terminal, a fresh dispatch is legal.
        store
            .update_task_status(&first.task_id, TaskStatus::Failed)
            .await
            .unwrap();
        let third = AgentTask::pending(envelope("wf-1", "scaffolding", "m-3"));
        assert!(store.insert_task(&third).await.unwrap());
    }

    #[tokio::test]
    async fn test_terminal_task_status_is_final() {
        let store = InMemoryStore::new();
        let task = AgentTask::pending(envelope("wf-1", "scaffolding", "m-1"));
        store.insert_task(&task).await.unwrap();
        store
            .update_task_status(&task.task_id, TaskStatus::Succeeded)
            .await
            .unwrap();

        let err = store
            .update_task_status(&task.task_id, TaskStatus::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, AdeError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_dispatched_timestamp_recorded() {
        let store = InMemoryStore::new();
        let task = AgentTask::pending(envelope("wf-1", "scaffolding", "m-1"));
        store.insert_task(&task).await.unwrap();
        store
            .update_task_status(&task.task_id, TaskStatus::Dispatched)
            .await
            .unwrap();
        let stored = store.get_task(&task.task_id).await.unwrap().unwrap();
        assert!(stored.dispatched_at.is_some());
    }

    #[tokio::test]
    async fn test_surface_unique_on_platform_and_type() {
        let store = InMemoryStore::new();
        let mut surface = PlatformSurface::new("p1", SurfaceType::Rest);
        store.upsert_surface(&surface).await.unwrap();

        surface.enabled = false;
        store.upsert_surface(&surface).await.unwrap();

        let surfaces = store.list_surfaces("p1").await.unwrap();
        assert_eq!(surfaces.len(), 1);
        assert!(!surfaces[0].enabled);
    }

    #[tokio::test]
    async fn test_definition_update_bumps_version() {
        let store = InMemoryStore::new();
        let definition = WorkflowDefinition::new(
            "p1",
            "ml",
            ade_core::DefinitionDocument { stages: vec![] },
        );
        store.insert_definition(&definition).await.unwrap();
        store.update_definition(&definition).await.unwrap();
        let stored = store.get_definition(&definition.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_enabled_only_definition_listing() {
        let store = InMemoryStore::new();
        let mut enabled = WorkflowDefinition::new(
            "p1",
            "a",
            ade_core::DefinitionDocument { stages: vec![] },
        );
        enabled.enabled = true;
        let mut disabled = WorkflowDefinition::new(
            "p1",
            "b",
            ade_core::DefinitionDocument { stages: vec![] },
        );
        disabled.enabled = false;
        store.insert_definition(&enabled).await.unwrap();
        store.insert_definition(&disabled).await.unwrap();

        assert_eq!(store.list_definitions("p1", true).await.unwrap().len(), 1);
        assert_eq!(store.list_definitions("p1", false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_events_scoped_to_workflow() {
        let store = InMemoryStore::new();
        store
            .append_event(&WorkflowEvent::new(
                "wf-1",
                ade_core::WorkflowEventKind::WorkflowCreated,
            ))
            .await
            .unwrap();
        store
            .append_event(&WorkflowEvent::new(
                "wf-2",
                ade_core::WorkflowEventKind::WorkflowCreated,
            ))
            .await
            .unwrap();

        assert_eq!(store.events_for_workflow("wf-1").await.unwrap().len(), 1);
    }
}
