// ADE Core - Persistence port
//
// Transactional store of workflows, tasks, platforms, surfaces, workflow
// definitions, and the agent registry. Workflow writes are guarded by
// compare-and-swap on the row's version token; everything else is
// last-writer-wins. Adapters live in ade-store.

use async_trait::async_trait;
use std::sync::Arc;

use crate::agent::AgentRecord;
use crate::definition::WorkflowDefinition;
use crate::error::AdeResult;
use crate::event::WorkflowEvent;
use crate::platform::{Platform, PlatformSurface, SurfaceType};
use crate::task::{AgentTask, TaskStatus};
use crate::workflow::Workflow;

/// The persistence port
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    // ------------------------------------------------------------------
    // Workflows
    // ------------------------------------------------------------------

    /// Insert a new workflow row. Fails with Conflict if the id exists.
    async fn insert_workflow(&self, workflow: &Workflow) -> AdeResult<()>;

    /// Fetch a workflow by id.
    async fn get_workflow(&self, workflow_id: &str) -> AdeResult<Option<Workflow>>;

    /// Conditionally replace a workflow row. The write succeeds only if the
    /// stored version equals `expected_version`; the stored row then carries
    /// `expected_version + 1`. Fails with Conflict on mismatch.
    async fn compare_and_swap_workflow(
        &self,
        workflow: &Workflow,
        expected_version: u64,
    ) -> AdeResult<()>;

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Insert a task row. Enforces the engine invariants: at most one
    /// non-terminal task per (workflow_id, stage), and idempotency on the
    /// envelope's message_id (a replayed envelope is a no-op).
    async fn insert_task(&self, task: &AgentTask) -> AdeResult<bool>;

    /// Fetch a task by id.
    async fn get_task(&self, task_id: &str) -> AdeResult<Option<AgentTask>>;

    /// Move a task to a new status. Terminal statuses are final; moving a
    /// terminal task fails with Conflict.
    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> AdeResult<()>;

    /// All tasks currently in the given status.
    async fn tasks_in_status(&self, status: TaskStatus) -> AdeResult<Vec<AgentTask>>;

    /// Look up the task persisted for a given envelope message id.
    async fn task_by_message_id(&self, message_id: &str) -> AdeResult<Option<AgentTask>>;

    // ------------------------------------------------------------------
    // Platforms and surfaces
    // ------------------------------------------------------------------

    async fn insert_platform(&self, platform: &Platform) -> AdeResult<()>;

    async fn get_platform(&self, platform_id: &str) -> AdeResult<Option<Platform>>;

    async fn list_platforms(&self) -> AdeResult<Vec<Platform>>;

    /// Insert or replace the unique (platform_id, surface_type) binding.
    async fn upsert_surface(&self, surface: &PlatformSurface) -> AdeResult<()>;

    async fn get_surface(
        &self,
        platform_id: &str,
        surface_type: SurfaceType,
    ) -> AdeResult<Option<PlatformSurface>>;

    async fn list_surfaces(&self, platform_id: &str) -> AdeResult<Vec<PlatformSurface>>;

    // ------------------------------------------------------------------
    // Workflow definitions
    // ------------------------------------------------------------------

    async fn insert_definition(&self, definition: &WorkflowDefinition) -> AdeResult<()>;

    async fn get_definition(&self, definition_id: &str) -> AdeResult<Option<WorkflowDefinition>>;

    /// Replace a definition document. Bumps the stored version.
    async fn update_definition(&self, definition: &WorkflowDefinition) -> AdeResult<()>;

    async fn delete_definition(&self, definition_id: &str) -> AdeResult<()>;

    /// Definitions owned by a platform, optionally restricted to enabled
    /// ones.
    async fn list_definitions(
        &self,
        platform_id: &str,
        enabled_only: bool,
    ) -> AdeResult<Vec<WorkflowDefinition>>;

    // ------------------------------------------------------------------
    // Agent registry
    // ------------------------------------------------------------------

    /// Insert or refresh an agent record (heartbeat path).
    async fn upsert_agent(&self, agent: &AgentRecord) -> AdeResult<()>;

    async fn agents_by_type(&self, agent_type: &str) -> AdeResult<Vec<AgentRecord>>;

    async fn list_agents(&self) -> AdeResult<Vec<AgentRecord>>;

    // ------------------------------------------------------------------
    // Audit events
    // ------------------------------------------------------------------

    async fn append_event(&self, event: &WorkflowEvent) -> AdeResult<()>;

    async fn events_for_workflow(&self, workflow_id: &str) -> AdeResult<Vec<WorkflowEvent>>;
}

/// Shared store reference
pub type StoreRef = Arc<dyn WorkflowStore>;
