// WorkflowMachine - per-workflow hierarchical state machine
//
// The machine is split per the engine's replayability rule: a pure,
// synchronous transition function `(workflow, event) -> actions`, and an
// async executor that runs the actions (router consultation, envelope
// build, dispatch, CAS persistence). The synchronous half computes a
// preliminary next stage from the legacy sequence so it stays deterministic
// and testable; the executor's evaluating step consults the definition
// router and overrides the preliminary choice, falling back to it if the
// router errors.
//
// Workflow rows are CAS-guarded: concurrent result deliveries for the same
// workflow linearize, the loser retries on fresh state.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use ade_core::{
    AdeError, AdeResult, AgentErrorDetail, StageDefinition, StoreRef, Workflow, WorkflowEvent,
    WorkflowEventKind, WorkflowStatus,
};

use crate::builder::EnvelopeBuilder;
use crate::dispatcher::TaskDispatcher;
use crate::router::{legacy_next, RouteDecision, StageOutcome, StageRouter};

/// Bound on CAS retries before giving up on an event
const MAX_CAS_ATTEMPTS: usize = 5;

/// Machine states. `Evaluating` is transient and never persisted; the
/// persisted workflow status maps onto the remaining states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Creating,
    AwaitingStage,
    Evaluating,
    Completed,
    Failed,
    Cancelled,
}

impl From<WorkflowStatus> for MachineState {
    fn from(status: WorkflowStatus) -> Self {
        match status {
            WorkflowStatus::Initiated => MachineState::Creating,
            WorkflowStatus::Running => MachineState::AwaitingStage,
            WorkflowStatus::Completed => MachineState::Completed,
            WorkflowStatus::Failed => MachineState::Failed,
            WorkflowStatus::Cancelled => MachineState::Cancelled,
        }
    }
}

/// Events fed to the machine. Timeouts arrive as StageFailed with a
/// TIMEOUT error code, synthesized onto the result channel by the reaper.
#[derive(Debug, Clone)]
pub enum MachineEvent {
    StageComplete {
        stage: String,
        output: serde_json::Value,
    },
    StageFailed {
        stage: String,
        errors: Vec<AgentErrorDetail>,
    },
    Cancel,
}

impl MachineEvent {
    fn stage(&self) -> Option<&str> {
        match self {
            MachineEvent::StageComplete { stage, .. } => Some(stage),
            MachineEvent::StageFailed { stage, .. } => Some(stage),
            MachineEvent::Cancel => None,
        }
    }
}

/// Actions produced by the pure transition function
#[derive(Debug, Clone)]
pub enum Action {
    /// Store the completed stage's output blob
    RecordOutput {
        stage: String,
        output: serde_json::Value,
    },
    /// Enter the evaluating step: consult the router, override the
    /// preliminary legacy decision, dispatch or terminate
    AdvanceStage {
        outcome: StageOutcome,
        preliminary: RouteDecision,
        errors: Vec<AgentErrorDetail>,
    },
    /// Transition to cancelled
    CancelWorkflow,
    /// Drop the event (late duplicate, terminal workflow, wrong state)
    Discard { reason: String },
}

/// Pure transition function. No IO, no clocks, fully deterministic.
pub fn transition(workflow: &Workflow, event: &MachineEvent) -> Vec<Action> {
    let state = MachineState::from(workflow.status);

    match state {
        MachineState::Completed | MachineState::Failed | MachineState::Cancelled => {
            vec![Action::Discard {
                reason: format!("workflow is terminal ({:?})", workflow.status),
            }]
        }
        MachineState::Creating => match event {
            MachineEvent::Cancel => vec![Action::CancelWorkflow],
            _ => vec![Action::Discard {
                reason: "workflow has not dispatched its first stage yet".to_string(),
            }],
        },
        MachineState::AwaitingStage | MachineState::Evaluating => {
            if let Some(stage) = event.stage() {
                // Late duplicate guard: a result for any stage other than
                // the outstanding one is dropped.
                if stage != workflow.current_stage {
                    return vec![Action::Discard {
                        reason: format!(
                            "result stage '{}' does not match current stage '{}'",
                            stage, workflow.current_stage
                        ),
                    }];
                }
            }

            match event {
                MachineEvent::StageComplete { stage, output } => vec![
                    Action::RecordOutput {
                        stage: stage.clone(),
                        output: output.clone(),
                    },
                    Action::AdvanceStage {
                        outcome: StageOutcome::Success,
                        preliminary: legacy_next(
                            &workflow.workflow_type,
                            stage,
                            StageOutcome::Success,
                        ),
                        errors: Vec::new(),
                    },
                ],
                MachineEvent::StageFailed { stage, errors } => vec![Action::AdvanceStage {
                    outcome: StageOutcome::Failure,
                    preliminary: legacy_next(
                        &workflow.workflow_type,
                        stage,
                        StageOutcome::Failure,
                    ),
                    errors: errors.clone(),
                }],
                MachineEvent::Cancel => vec![Action::CancelWorkflow],
            }
        }
    }
}

/// Executor for the action lists produced by `transition`
pub struct WorkflowMachine {
    store: StoreRef,
    router: Arc<StageRouter>,
    dispatcher: Arc<TaskDispatcher>,
}

impl WorkflowMachine {
    pub fn new(store: StoreRef, router: Arc<StageRouter>, dispatcher: Arc<TaskDispatcher>) -> Self {
        Self {
            store,
            router,
            dispatcher,
        }
    }

    /// Drive one event through the machine, retrying on CAS conflicts with
    /// a fresh read each time.
    pub async fn handle_event(&self, workflow_id: &str, event: MachineEvent) -> AdeResult<()> {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let workflow = self
                .store
                .get_workflow(workflow_id)
                .await?
                .ok_or_else(|| AdeError::NotFound(format!("workflow {}", workflow_id)))?;

            match self.step(workflow, &event).await {
                Err(AdeError::Conflict(reason)) if attempt + 1 < MAX_CAS_ATTEMPTS => {
                    debug!(workflow_id, attempt, "transition lost CAS race, retrying: {}", reason);
                    let jitter_ms = rand::thread_rng().gen_range(5..25);
                    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                    continue;
                }
                other => return other,
            }
        }
        Err(AdeError::Conflict(format!(
            "workflow {} transition exhausted {} CAS attempts",
            workflow_id, MAX_CAS_ATTEMPTS
        )))
    }

    /// Transition 1: dispatch the first stage of a freshly inserted
    /// workflow and move it to awaiting_stage.
    pub async fn start(&self, workflow: &Workflow, created_by: &str) -> AdeResult<()> {
        let (initial, is_fallback) = self.router.initial_stage(workflow).await?;
        let stage_definition = self.stage_definition(workflow, &initial.stage).await;

        let mut updated = workflow.clone();
        let envelope = EnvelopeBuilder::build(
            &updated,
            &initial.stage,
            &initial.agent_type,
            stage_definition.as_ref(),
            created_by,
        )?;
        updated.current_stage = initial.stage.clone();
        updated.current_span_id = envelope.trace.span_id.clone();
        updated.status = WorkflowStatus::Running;

        self.store
            .compare_and_swap_workflow(&updated, workflow.version)
            .await?;
        self.append_event(
            WorkflowEvent::new(&updated.id, WorkflowEventKind::StageDispatched)
                .with_stage(&initial.stage)
                .with_detail(serde_json::json!({ "is_fallback": is_fallback })),
        )
        .await;

        match self
            .dispatcher
            .dispatch(envelope, updated.platform_id.as_deref())
            .await
        {
            Ok(()) => Ok(()),
            Err(e @ AdeError::AgentUnavailable(_)) => {
                self.fail_workflow(&updated.id, &e.to_string()).await?;
                Err(e)
            }
            Err(e @ AdeError::Transport(_)) => {
                // Creation fails fast; the pending task row (if any) is
                // skipped by the reaper once the workflow is terminal.
                self.fail_workflow(&updated.id, &e.to_string()).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn step(&self, mut workflow: Workflow, event: &MachineEvent) -> AdeResult<()> {
        let expected_version = workflow.version;
        let actions = transition(&workflow, event);

        for action in actions {
            match action {
                Action::Discard { reason } => {
                    debug!(workflow_id = %workflow.id, "event discarded: {}", reason);
                    return Ok(());
                }
                Action::CancelWorkflow => {
                    return self.cancel(workflow, expected_version).await;
                }
                Action::RecordOutput { stage, output } => {
                    workflow.record_stage_output(&stage, output);
                }
                Action::AdvanceStage {
                    outcome,
                    preliminary,
                    errors,
                } => {
                    return self
                        .advance(workflow, expected_version, outcome, preliminary, errors)
                        .await;
                }
            }
        }
        Ok(())
    }

    /// The evaluating step: definition router overrides the preliminary
    /// legacy decision; if the router fails the preliminary choice stands.
    async fn advance(
        &self,
        mut workflow: Workflow,
        expected_version: u64,
        outcome: StageOutcome,
        preliminary: RouteDecision,
        errors: Vec<AgentErrorDetail>,
    ) -> AdeResult<()> {
        let closed_stage = workflow.current_stage.clone();

        let decision = match self
            .router
            .next_stage(&workflow, &closed_stage, outcome)
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    workflow_id = %workflow.id,
                    stage = %closed_stage,
                    "router failed, preliminary decision stands: {}",
                    e
                );
                preliminary
            }
        };

        if decision.skipped_current {
            workflow.skipped_stages.push(closed_stage.clone());
        }

        // Recompute progress authoritatively; the computed value wins, the
        // stored value only bounds it from below.
        let computed = self
            .router
            .progress(&workflow)
            .await
            .unwrap_or(workflow.progress);
        workflow.progress = computed.max(workflow.progress);

        let closure_event = match (outcome, decision.skipped_current) {
            (StageOutcome::Success, _) => {
                WorkflowEvent::new(&workflow.id, WorkflowEventKind::StageCompleted)
                    .with_stage(&closed_stage)
            }
            (StageOutcome::Failure, true) => {
                WorkflowEvent::new(&workflow.id, WorkflowEventKind::StageSkipped)
                    .with_stage(&closed_stage)
                    .with_detail(serde_json::json!({ "errors": &errors }))
            }
            (StageOutcome::Failure, false) => {
                WorkflowEvent::new(&workflow.id, WorkflowEventKind::StageFailed)
                    .with_stage(&closed_stage)
                    .with_detail(serde_json::json!({ "errors": &errors }))
            }
        };

        match decision.next {
            None if decision.terminal_failure => {
                workflow.status = WorkflowStatus::Failed;
                self.store
                    .compare_and_swap_workflow(&workflow, expected_version)
                    .await?;
                self.append_event(closure_event).await;
                self.append_event(
                    WorkflowEvent::new(&workflow.id, WorkflowEventKind::WorkflowFailed)
                        .with_stage(&closed_stage)
                        .with_detail(serde_json::json!({ "errors": &errors })),
                )
                .await;
                info!(workflow_id = %workflow.id, stage = %closed_stage, "workflow failed");
                Ok(())
            }
            None => {
                workflow.status = WorkflowStatus::Completed;
                workflow.progress = 100;
                self.store
                    .compare_and_swap_workflow(&workflow, expected_version)
                    .await?;
                self.append_event(closure_event).await;
                self.append_event(WorkflowEvent::new(
                    &workflow.id,
                    WorkflowEventKind::WorkflowCompleted,
                ))
                .await;
                info!(workflow_id = %workflow.id, "workflow completed");
                Ok(())
            }
            Some(next) => {
                let stage_definition = self.stage_definition(&workflow, &next.stage).await;
                let envelope = EnvelopeBuilder::build(
                    &workflow,
                    &next.stage,
                    &next.agent_type,
                    stage_definition.as_ref(),
                    "orchestrator",
                )?;
                workflow.current_stage = next.stage.clone();
                workflow.current_span_id = envelope.trace.span_id.clone();
                workflow.status = WorkflowStatus::Running;

                // Claim the transition before dispatching so a concurrent
                // consumer of the same result loses the CAS race instead of
                // double-dispatching.
                self.store
                    .compare_and_swap_workflow(&workflow, expected_version)
                    .await?;
                self.append_event(closure_event).await;
                self.append_event(
                    WorkflowEvent::new(&workflow.id, WorkflowEventKind::StageDispatched)
                        .with_stage(&next.stage)
                        .with_detail(serde_json::json!({ "is_fallback": decision.is_fallback })),
                )
                .await;

                match self
                    .dispatcher
                    .dispatch(envelope, workflow.platform_id.as_deref())
                    .await
                {
                    Ok(()) => Ok(()),
                    Err(e @ AdeError::AgentUnavailable(_)) => {
                        self.fail_workflow(&workflow.id, &e.to_string()).await?;
                        Ok(())
                    }
                    Err(AdeError::Transport(reason)) => {
                        // Task row is pending; the reaper republishes it.
                        warn!(
                            workflow_id = %workflow.id,
                            "dispatch publish failed, awaiting reaper: {}",
                            reason
                        );
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn cancel(&self, mut workflow: Workflow, expected_version: u64) -> AdeResult<()> {
        workflow.status = WorkflowStatus::Cancelled;
        self.store
            .compare_and_swap_workflow(&workflow, expected_version)
            .await?;
        self.append_event(WorkflowEvent::new(
            &workflow.id,
            WorkflowEventKind::WorkflowCancelled,
        ))
        .await;
        info!(workflow_id = %workflow.id, "workflow cancelled");
        Ok(())
    }

    /// Terminal failure outside normal stage routing (agent unavailable,
    /// creation-time transport failure). The machine-readable reason lands
    /// in stage_outputs.validation_error.
    pub async fn fail_workflow(&self, workflow_id: &str, reason: &str) -> AdeResult<()> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(mut workflow) = self.store.get_workflow(workflow_id).await? else {
                return Err(AdeError::NotFound(format!("workflow {}", workflow_id)));
            };
            if workflow.status.is_terminal() {
                return Ok(());
            }
            let expected_version = workflow.version;
            workflow.status = WorkflowStatus::Failed;
            workflow
                .stage_outputs
                .insert("validation_error".to_string(), serde_json::json!(reason));
            match self
                .store
                .compare_and_swap_workflow(&workflow, expected_version)
                .await
            {
                Ok(()) => {
                    self.append_event(
                        WorkflowEvent::new(workflow_id, WorkflowEventKind::WorkflowFailed)
                            .with_detail(serde_json::json!({ "reason": reason })),
                    )
                    .await;
                    return Ok(());
                }
                Err(AdeError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(AdeError::Conflict(format!(
            "failed to mark workflow {} failed",
            workflow_id
        )))
    }

    async fn stage_definition(
        &self,
        workflow: &Workflow,
        stage: &str,
    ) -> Option<StageDefinition> {
        match self.router.resolve_definition(workflow).await {
            Ok(Some(definition)) => definition.definition.stage(stage).cloned(),
            _ => None,
        }
    }

    /// Audit writes are best-effort; a failed append never blocks the
    /// state transition that already committed.
    async fn append_event(&self, event: WorkflowEvent) {
        if let Err(e) = self.store.append_event(&event).await {
            warn!(workflow_id = %event.workflow_id, "audit append failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ade_core::CreateWorkflowRequest;

    fn workflow(status: WorkflowStatus, current_stage: &str) -> Workflow {
        let mut workflow = Workflow::new(
            &CreateWorkflowRequest {
                workflow_type: "app".to_string(),
                name: "hello".to_string(),
                platform_id: None,
                workflow_definition_id: None,
                input_data: serde_json::json!({}),
            },
            None,
        );
        workflow.status = status;
        workflow.current_stage = current_stage.to_string();
        workflow
    }

    #[test]
    fn test_complete_produces_record_and_advance() {
        let wf = workflow(WorkflowStatus::Running, "initialization");
        let actions = transition(
            &wf,
            &MachineEvent::StageComplete {
                stage: "initialization".to_string(),
                output: serde_json::json!({"ok": true}),
            },
        );
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], Action::RecordOutput { .. }));
        match &actions[1] {
            Action::AdvanceStage {
                outcome,
                preliminary,
                ..
            } => {
                assert_eq!(*outcome, StageOutcome::Success);
                // Preliminary answer comes from the legacy app sequence.
                assert_eq!(
                    preliminary.next.as_ref().unwrap().stage,
                    "scaffolding"
                );
            }
            other => panic!("expected AdvanceStage, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_produces_advance_without_record() {
        let wf = workflow(WorkflowStatus::Running, "validation");
        let actions = transition(
            &wf,
            &MachineEvent::StageFailed {
                stage: "validation".to_string(),
                errors: vec![],
            },
        );
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            actions[0],
            Action::AdvanceStage {
                outcome: StageOutcome::Failure,
                ..
            }
        ));
    }

    #[test]
    fn test_stage_mismatch_discards() {
        let wf = workflow(WorkflowStatus::Running, "e2e");
        let actions = transition(
            &wf,
            &MachineEvent::StageComplete {
                stage: "scaffolding".to_string(),
                output: serde_json::json!({}),
            },
        );
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], Action::Discard { .. }));
    }

    #[test]
    fn test_terminal_workflow_discards_everything() {
        for status in [
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ] {
            let wf = workflow(status, "deployment");
            let actions = transition(
                &wf,
                &MachineEvent::StageComplete {
                    stage: "deployment".to_string(),
                    output: serde_json::json!({}),
                },
            );
            assert!(matches!(actions[0], Action::Discard { .. }));

            let actions = transition(&wf, &MachineEvent::Cancel);
            assert!(matches!(actions[0], Action::Discard { .. }));
        }
    }

    #[test]
    fn test_cancel_in_running_cancels() {
        let wf = workflow(WorkflowStatus::Running, "scaffolding");
        let actions = transition(&wf, &MachineEvent::Cancel);
        assert!(matches!(actions[0], Action::CancelWorkflow));
    }

    #[test]
    fn test_creating_admits_only_cancel() {
        let wf = workflow(WorkflowStatus::Initiated, "");
        let actions = transition(
            &wf,
            &MachineEvent::StageComplete {
                stage: "initialization".to_string(),
                output: serde_json::json!({}),
            },
        );
        assert!(matches!(actions[0], Action::Discard { .. }));

        let actions = transition(&wf, &MachineEvent::Cancel);
        assert!(matches!(actions[0], Action::CancelWorkflow));
    }
}
