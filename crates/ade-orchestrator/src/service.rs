// WorkflowService - the ingress operations of the engine
//
// create / cancel / get. Creation runs the full admission pipeline: surface
// gate, platform existence, pre-execution agent-type validation, row write,
// then the machine's start transition (initial stage dispatch).

use std::sync::Arc;
use tracing::info;

use ade_core::{
    AdeError, AdeResult, AgentRegistry, CreateWorkflowRequest, StoreRef, SurfaceContext, Workflow,
    WorkflowEvent, WorkflowEventKind, WorkflowSummary,
};

use crate::gate::SurfaceGate;
use crate::machine::{MachineEvent, WorkflowMachine};
use crate::router::StageRouter;

/// Workflow ingress service
pub struct WorkflowService {
    store: StoreRef,
    gate: Arc<SurfaceGate>,
    router: Arc<StageRouter>,
    registry: Arc<AgentRegistry>,
    machine: Arc<WorkflowMachine>,
}

impl WorkflowService {
    pub fn new(
        store: StoreRef,
        gate: Arc<SurfaceGate>,
        router: Arc<StageRouter>,
        registry: Arc<AgentRegistry>,
        machine: Arc<WorkflowMachine>,
    ) -> Self {
        Self {
            store,
            gate,
            router,
            registry,
            machine,
        }
    }

    /// Admit and start a workflow. Rejects with SurfaceNotBound,
    /// PlatformNotFound, or DefinitionInvalid before any row is written, so
    /// a rejected request leaves no workflow in a non-terminal state.
    pub async fn create_workflow(
        &self,
        request: CreateWorkflowRequest,
        created_by: &str,
        surface_context: Option<SurfaceContext>,
    ) -> AdeResult<WorkflowSummary> {
        self.gate.check(surface_context.as_ref()).await?;

        if let Some(platform_id) = &request.platform_id {
            self.store
                .get_platform(platform_id)
                .await?
                .ok_or_else(|| AdeError::PlatformNotFound(platform_id.clone()))?;
        }

        let workflow = Workflow::new(&request, surface_context.as_ref());

        // Fail fast on definitions referencing agent types nobody serves.
        let missing = self.router.validate(&workflow, &self.registry).await?;
        if !missing.is_empty() {
            return Err(AdeError::DefinitionInvalid(format!(
                "no registered agents for types: {}",
                missing.join(", ")
            )));
        }

        self.store.insert_workflow(&workflow).await?;
        let _ = self
            .store
            .append_event(
                &WorkflowEvent::new(&workflow.id, WorkflowEventKind::WorkflowCreated)
                    .with_detail(serde_json::json!({ "created_by": created_by })),
            )
            .await;

        info!(
            workflow_id = %workflow.id,
            workflow_type = %workflow.workflow_type,
            name = %workflow.name,
            "workflow created"
        );

        self.machine.start(&workflow, created_by).await?;

        let stored = self
            .store
            .get_workflow(&workflow.id)
            .await?
            .ok_or_else(|| AdeError::Internal("workflow vanished after start".to_string()))?;
        Ok(WorkflowSummary::from(&stored))
    }

    /// External cancel. Terminal immediately; any outstanding task's late
    /// result is discarded on arrival.
    pub async fn cancel_workflow(&self, workflow_id: &str) -> AdeResult<()> {
        self.machine
            .handle_event(workflow_id, MachineEvent::Cancel)
            .await
    }

    /// Dashboard projection.
    pub async fn get_workflow(&self, workflow_id: &str) -> AdeResult<WorkflowSummary> {
        let workflow = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| AdeError::NotFound(format!("workflow {}", workflow_id)))?;
        Ok(WorkflowSummary::from(&workflow))
    }

    /// Full row, for diagnostics and tests.
    pub async fn get_workflow_detail(&self, workflow_id: &str) -> AdeResult<Workflow> {
        self.store
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| AdeError::NotFound(format!("workflow {}", workflow_id)))
    }
}
