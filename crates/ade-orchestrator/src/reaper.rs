// Reapers - timeout enforcement, pending-task recovery, heartbeat upkeep
//
// The timeout reaper scans dispatched/running tasks whose age exceeds their
// envelope timeout and synthesizes a failed AgentResult onto the result
// channel, so the state machine observes timeouts through the same path as
// real results. The pending reaper republishes tasks whose publish failed,
// completing the dispatcher's at-least-once promise. The heartbeat reaper
// demotes registry records whose heartbeats went stale to offline.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use ade_core::{
    AdeResult, AgentErrorDetail, AgentRegistry, AgentResult, AgentTask, PublishOptions,
    ResultBody, ResultMetrics, ResultStatus, StoreRef, SubscriptionHandle, SubstrateRef,
    TaskStatus, RESULTS_CHANNEL,
};

use crate::dispatcher::TaskDispatcher;

/// Agent id stamped on synthesized timeout results
const REAPER_AGENT_ID: &str = "timeout-reaper";

/// Scans for tasks that exceeded their envelope timeout
pub struct TimeoutReaper {
    store: StoreRef,
    substrate: SubstrateRef,
    interval: Duration,
}

impl TimeoutReaper {
    pub fn new(store: StoreRef, substrate: SubstrateRef, interval: Duration) -> Self {
        Self {
            store,
            substrate,
            interval,
        }
    }

    /// Spawn the periodic scan loop.
    pub fn spawn(self: Arc<Self>) -> SubscriptionHandle {
        let join = tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.interval).await;
                match self.scan().await {
                    Ok(0) => {}
                    Ok(reaped) => info!(reaped, "timed-out tasks reaped"),
                    Err(e) => warn!("timeout scan failed: {}", e),
                }
            }
        });
        SubscriptionHandle::new(join)
    }

    /// One scan pass. Returns how many tasks were timed out.
    pub async fn scan(&self) -> AdeResult<usize> {
        let now = Utc::now();
        let mut reaped = 0;

        for status in [TaskStatus::Dispatched, TaskStatus::Running] {
            for task in self.store.tasks_in_status(status).await? {
                if !task.timed_out_at(now) {
                    continue;
                }

                let result = synthesize_timeout_result(&task);
                self.substrate
                    .publish(
                        RESULTS_CHANNEL,
                        serde_json::to_value(&result)?,
                        PublishOptions::durable(task.workflow_id.clone()),
                    )
                    .await?;
                // Close the task row now so the next scan does not
                // synthesize a second result for it.
                if let Err(e) = self
                    .store
                    .update_task_status(&task.task_id, TaskStatus::Failed)
                    .await
                {
                    warn!(task_id = %task.task_id, "task close after timeout failed: {}", e);
                }
                warn!(
                    task_id = %task.task_id,
                    workflow_id = %task.workflow_id,
                    stage = %task.stage,
                    timeout_ms = task.envelope.constraints.timeout_ms,
                    "task timed out"
                );
                reaped += 1;
            }
        }

        Ok(reaped)
    }
}

/// Build the failed AgentResult the state machine will observe for a timed
/// out task.
fn synthesize_timeout_result(task: &AgentTask) -> AgentResult {
    AgentResult {
        message_id: uuid::Uuid::new_v4().to_string(),
        task_id: task.task_id.clone(),
        workflow_id: task.workflow_id.clone(),
        agent_id: REAPER_AGENT_ID.to_string(),
        agent_type: task.agent_type.clone(),
        stage: task.stage.clone(),
        success: false,
        status: ResultStatus::Failed,
        action: "timeout".to_string(),
        result: ResultBody {
            data: serde_json::Value::Null,
            metrics: ResultMetrics {
                duration_ms: task.envelope.constraints.timeout_ms,
                resource_usage: HashMap::new(),
            },
        },
        errors: vec![AgentErrorDetail {
            code: "TIMEOUT".to_string(),
            message: format!(
                "stage '{}' exceeded its {} ms budget",
                task.stage, task.envelope.constraints.timeout_ms
            ),
            recoverable: false,
        }],
        next_actions: None,
        trace: task.envelope.trace.clone(),
        timestamp: Utc::now(),
        version: ade_core::ENVELOPE_VERSION.to_string(),
    }
}

/// Republishes tasks stuck in pending after a failed publish
pub struct PendingReaper {
    store: StoreRef,
    dispatcher: Arc<TaskDispatcher>,
    interval: Duration,
}

impl PendingReaper {
    pub fn new(store: StoreRef, dispatcher: Arc<TaskDispatcher>, interval: Duration) -> Self {
        Self {
            store,
            dispatcher,
            interval,
        }
    }

    pub fn spawn(self: Arc<Self>) -> SubscriptionHandle {
        let join = tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.interval).await;
                if let Err(e) = self.scan().await {
                    warn!("pending scan failed: {}", e);
                }
            }
        });
        SubscriptionHandle::new(join)
    }

    /// Republish pending tasks old enough that their original publish has
    /// clearly failed. Tasks of terminal workflows are closed instead.
    pub async fn scan(&self) -> AdeResult<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::milliseconds(self.interval.as_millis() as i64);
        let mut republished = 0;

        for task in self.store.tasks_in_status(TaskStatus::Pending).await? {
            if task.created_at > cutoff {
                continue;
            }

            let workflow = self.store.get_workflow(&task.workflow_id).await?;
            let terminal = workflow.map(|w| w.status.is_terminal()).unwrap_or(true);
            if terminal {
                if let Err(e) = self
                    .store
                    .update_task_status(&task.task_id, TaskStatus::Failed)
                    .await
                {
                    warn!(task_id = %task.task_id, "orphan task close failed: {}", e);
                }
                continue;
            }

            match self.dispatcher.publish_task(&task).await {
                Ok(()) => republished += 1,
                Err(e) => warn!(task_id = %task.task_id, "republish failed: {}", e),
            }
        }

        Ok(republished)
    }
}

/// Demotes registry records with stale heartbeats to offline
pub struct HeartbeatReaper {
    registry: Arc<AgentRegistry>,
    interval: Duration,
}

impl HeartbeatReaper {
    pub fn new(registry: Arc<AgentRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    pub fn spawn(self: Arc<Self>) -> SubscriptionHandle {
        let join = tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.interval).await;
                if let Err(e) = self.registry.demote_stale().await {
                    warn!("heartbeat scan failed: {}", e);
                }
            }
        });
        SubscriptionHandle::new(join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ade_core::{
        AgentEnvelope, Constraints, EnvelopeMetadata, EnvelopeStatus, Priority, TraceContext,
        WorkflowContext, ENVELOPE_VERSION,
    };

    fn sample_envelope() -> AgentEnvelope {
        AgentEnvelope {
            message_id: "msg-1".to_string(),
            task_id: "task-1".to_string(),
            workflow_id: "wf-1".to_string(),
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
                trace_id: "trace-1".to_string(),
                span_id: "span-1".to_string(),
                parent_span_id: None,
            },
            workflow_context: WorkflowContext {
                workflow_type: "app".to_string(),
                workflow_name: "hello".to_string(),
                current_stage: "scaffolding".to_string(),
                stage_outputs: HashMap::new(),
                surface_context: None,
            },
        }
    }

    #[test]
    fn test_synthesized_result_passes_validation() {
        let mut task = AgentTask::pending(sample_envelope());
        task.status = TaskStatus::Dispatched;
        let result = synthesize_timeout_result(&task);

        // Must survive the result consumer's schema pass.
        let value = serde_json::to_value(&result).unwrap();
        let parsed = AgentResult::from_json(value).unwrap();
        assert_eq!(parsed.stage, task.stage);
        assert_eq!(parsed.errors[0].code, "TIMEOUT");
        assert!(!parsed.success);
    }
}
