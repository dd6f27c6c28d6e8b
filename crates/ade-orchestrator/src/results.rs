// ResultConsumer - the single long-lived subscription on orchestrator:results
//
// Routing is purely data-driven: workflow_id plus the mandatory stage field
// on each AgentResult. There is no per-workflow handler state in memory.
// Schema rejections are never acknowledged; the substrate redelivers them.
// Results for terminal or unknown workflows are logged and dropped (acked).

use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, error, warn};

use ade_core::{
    AdeResult, AgentResult, FnHandler, MessageHandler, ResultStatus, StoreRef, SubscribeOptions,
    SubscriptionHandle, SubstrateRef, TaskStatus, RESULTS_CHANNEL, RESULTS_GROUP,
};

use crate::machine::{MachineEvent, WorkflowMachine};

/// Validation failures per message fingerprint before escalating the log
/// level (the message keeps redelivering either way; quarantine is left to
/// operators).
const POISON_LOG_THRESHOLD: u32 = 5;

/// Consumer of the shared results channel
pub struct ResultConsumer {
    substrate: SubstrateRef,
    store: StoreRef,
    machine: Arc<WorkflowMachine>,
    rejection_counts: DashMap<u64, u32>,
}

impl ResultConsumer {
    pub fn new(substrate: SubstrateRef, store: StoreRef, machine: Arc<WorkflowMachine>) -> Self {
        Self {
            substrate,
            store,
            machine,
            rejection_counts: DashMap::new(),
        }
    }

    /// Start the subscription under the orchestrator's consumer group.
    pub async fn start(self: Arc<Self>, consumer_name: &str) -> AdeResult<SubscriptionHandle> {
        let consumer = self.clone();
        let handler = FnHandler(move |message: serde_json::Value| {
            let consumer = consumer.clone();
            async move { consumer.process(message).await }
        });

        self.substrate
            .subscribe(
                RESULTS_CHANNEL,
                Arc::new(handler) as Arc<dyn MessageHandler>,
                SubscribeOptions::group(RESULTS_GROUP, consumer_name),
            )
            .await
    }

    async fn process(&self, message: serde_json::Value) -> AdeResult<()> {
        let result = match AgentResult::from_json(message.clone()) {
            Ok(result) => result,
            Err(e) => {
                let fingerprint = fingerprint(&message);
                let mut count = self.rejection_counts.entry(fingerprint).or_insert(0);
                *count += 1;
                if *count >= POISON_LOG_THRESHOLD {
                    error!(
                        rejections = *count,
                        "result repeatedly fails validation (poison message): {}", e
                    );
                } else {
                    warn!("result failed validation, leaving unacked: {}", e);
                }
                return Err(e);
            }
        };

        let Some(workflow) = self.store.get_workflow(&result.workflow_id).await? else {
            warn!(
                workflow_id = %result.workflow_id,
                stage = %result.stage,
                "result for unknown workflow, dropping"
            );
            return Ok(());
        };

        // Close the task row first so the audit trail stays consistent even
        // when the state-machine step is a duplicate no-op.
        if let Some(task) = self.store.get_task(&result.task_id).await? {
            if !task.status.is_terminal() {
                let status = if result.success {
                    TaskStatus::Succeeded
                } else {
                    TaskStatus::Failed
                };
                if let Err(e) = self.store.update_task_status(&task.task_id, status).await {
                    warn!(task_id = %task.task_id, "task close failed: {}", e);
                }
            }
        }

        if workflow.status.is_terminal() {
            debug!(
                workflow_id = %workflow.id,
                stage = %result.stage,
                "late result for terminal workflow, dropping"
            );
            return Ok(());
        }

        let event = match result.status {
            ResultStatus::Success => MachineEvent::StageComplete {
                stage: result.stage.clone(),
                output: result.result.data.clone(),
            },
            ResultStatus::Failed | ResultStatus::Cancelled => MachineEvent::StageFailed {
                stage: result.stage.clone(),
                errors: result.errors.clone(),
            },
        };

        // A handler error here leaves the message pending; the substrate
        // redelivers and the machine retries on fresh state.
        self.machine.handle_event(&result.workflow_id, event).await
    }
}

fn fingerprint(message: &serde_json::Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    message.to_string().hash(&mut hasher);
    hasher.finish()
}
