// TaskDispatcher - persist-then-publish task dispatch
//
// Dispatch order is fixed: persist the AgentTask row (status pending),
// publish the envelope keyed by workflow id with a stream mirror, then mark
// the row dispatched. If the publish fails the row stays pending and the
// pending reaper retries it; agents deduplicate on message_id
// (at-least-once, never at-most-once).

use std::sync::Arc;
use tracing::{info, warn};

use ade_core::{
    task_channel, AdeError, AdeResult, AgentEnvelope, AgentRegistry, AgentTask, PublishOptions,
    StoreRef, SubstrateRef, TaskStatus,
};

/// Task dispatcher
pub struct TaskDispatcher {
    store: StoreRef,
    substrate: SubstrateRef,
    registry: Arc<AgentRegistry>,
}

impl TaskDispatcher {
    pub fn new(store: StoreRef, substrate: SubstrateRef, registry: Arc<AgentRegistry>) -> Self {
        Self {
            store,
            substrate,
            registry,
        }
    }

    /// Dispatch one envelope. Fails with AgentUnavailable when no online
    /// executor of the required type exists - a task nobody will consume is
    /// never published. Fails with Transport when the publish fails; the
    /// task row is left pending for the reaper in that case.
    pub async fn dispatch(
        &self,
        envelope: AgentEnvelope,
        platform_id: Option<&str>,
    ) -> AdeResult<()> {
        let available = self
            .registry
            .validate_agent_exists(&envelope.agent_type, platform_id)
            .await?;
        if !available {
            return Err(AdeError::AgentUnavailable(format!(
                "no online agent of type '{}'",
                envelope.agent_type
            )));
        }

        let task = AgentTask::pending(envelope.clone());
        let inserted = self.store.insert_task(&task).await?;
        if !inserted {
            // Same message_id already persisted: replayed envelope, done.
            return Ok(());
        }

        self.publish_task(&task).await
    }

    /// Publish a persisted pending task and mark it dispatched.
    pub async fn publish_task(&self, task: &AgentTask) -> AdeResult<()> {
        let channel = task_channel(&task.agent_type);
        let payload = serde_json::to_value(&task.envelope)?;

        match self
            .substrate
            .publish(&channel, payload, PublishOptions::durable(task.workflow_id.clone()))
            .await
        {
            Ok(_) => {
                self.store
                    .update_task_status(&task.task_id, TaskStatus::Dispatched)
                    .await?;
                info!(
                    task_id = %task.task_id,
                    workflow_id = %task.workflow_id,
                    stage = %task.stage,
                    agent_type = %task.agent_type,
                    "task dispatched"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    task_id = %task.task_id,
                    workflow_id = %task.workflow_id,
                    "publish failed, task stays pending for the reaper: {}",
                    e
                );
                Err(e)
            }
        }
    }

    /// Republish every task stuck in pending. Returns how many were
    /// successfully moved to dispatched.
    pub async fn republish_pending(&self) -> AdeResult<usize> {
        let pending = self.store.tasks_in_status(TaskStatus::Pending).await?;
        let mut republished = 0;
        for task in pending {
            match self.publish_task(&task).await {
                Ok(()) => republished += 1,
                Err(e) => warn!(task_id = %task.task_id, "republish failed: {}", e),
            }
        }
        Ok(republished)
    }
}
