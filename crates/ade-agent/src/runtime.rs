// AgentRuntime - the reusable, agent-type-agnostic executor harness
//
// Consumes the type's task channel under the shared consumer group,
// validates every envelope against schema v2.0.0, invokes the type-specific
// executor with the full envelope, and publishes a complete AgentResult -
// including the outer `stage` field the orchestrator routes on. The inbound
// task is acknowledged only once the result publish has succeeded; an
// executor failure still produces (and publishes) a failed result, after
// which the handler returns normally.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use ade_core::{
    task_channel, task_group, AdeResult, AgentEnvelope, AgentErrorDetail, AgentRecord,
    AgentRegistry, AgentResult, FnHandler, MessageHandler, PublishOptions, ResultBody,
    ResultMetrics, ResultStatus, SubscribeOptions, SubscriptionHandle, SubstrateRef,
    ENVELOPE_VERSION, RESULTS_CHANNEL,
};

use crate::executor::StageExecutor;

/// The agent-side runtime
pub struct AgentRuntime {
    agent_id: String,
    agent_type: String,
    platform_id: Option<String>,
    substrate: SubstrateRef,
    registry: Arc<AgentRegistry>,
    executor: Arc<dyn StageExecutor>,
    /// message_ids already answered by this instance; duplicates are acked
    /// without re-execution
    answered: DashMap<String, ()>,
}

impl AgentRuntime {
    pub fn new(
        agent_type: impl Into<String>,
        substrate: SubstrateRef,
        registry: Arc<AgentRegistry>,
        executor: Arc<dyn StageExecutor>,
    ) -> Self {
        let agent_type = agent_type.into();
        Self {
            agent_id: format!("{}-{}", agent_type, Uuid::new_v4()),
            agent_type,
            platform_id: None,
            substrate,
            registry,
            executor,
            answered: DashMap::new(),
        }
    }

    /// Scope this instance to one platform.
    pub fn with_platform(mut self, platform_id: impl Into<String>) -> Self {
        self.platform_id = Some(platform_id.into());
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Register and start consuming. Startup is refused when registration
    /// fails - an unregistered agent would consume tasks the dispatcher
    /// does not know it can serve.
    pub async fn start(self: Arc<Self>) -> AdeResult<SubscriptionHandle> {
        let mut record = AgentRecord::new(&self.agent_id, &self.agent_type);
        if let Some(platform_id) = &self.platform_id {
            record = record.with_platform(platform_id.clone());
        }
        self.registry.register(record).await?;

        info!(
            agent_id = %self.agent_id,
            agent_type = %self.agent_type,
            "agent runtime starting"
        );

        let runtime = self.clone();
        let handler = FnHandler(move |message: serde_json::Value| {
            let runtime = runtime.clone();
            async move { runtime.handle(message).await }
        });

        self.substrate
            .subscribe(
                &task_channel(&self.agent_type),
                Arc::new(handler) as Arc<dyn MessageHandler>,
                SubscribeOptions::group(task_group(&self.agent_type), &self.agent_id),
            )
            .await
    }

    /// Refresh this instance's registry heartbeat.
    pub async fn heartbeat(&self) -> AdeResult<()> {
        self.registry.heartbeat(&self.agent_id).await
    }

    async fn handle(&self, message: serde_json::Value) -> AdeResult<()> {
        // Validation failure throws: no ack, the substrate redelivers.
        let envelope = AgentEnvelope::from_json(message)?;

        if self.answered.contains_key(&envelope.message_id) {
            // Redelivered duplicate of a task whose result already went
            // out; acknowledge without re-executing.
            warn!(
                message_id = %envelope.message_id,
                task_id = %envelope.task_id,
                "duplicate task delivery, skipping"
            );
            return Ok(());
        }

        let started = Instant::now();
        let outcome = self.executor.execute(&envelope).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(data) => self.build_result(&envelope, duration_ms, data, None),
            Err(e) => {
                warn!(
                    task_id = %envelope.task_id,
                    stage = %envelope.workflow_context.current_stage,
                    "executor failed: {}",
                    e
                );
                self.build_result(
                    &envelope,
                    duration_ms,
                    serde_json::Value::Null,
                    Some(AgentErrorDetail {
                        code: "EXECUTOR_ERROR".to_string(),
                        message: e.to_string(),
                        recoverable: e.is_retryable(),
                    }),
                )
            }
        };

        // Return only after the publish acknowledges; the substrate then
        // acks the inbound task. A failed publish leaves the task pending
        // and the next delivery re-executes.
        self.substrate
            .publish(
                RESULTS_CHANNEL,
                serde_json::to_value(&result)?,
                PublishOptions::durable(envelope.workflow_id.clone()),
            )
            .await?;

        self.answered.insert(envelope.message_id.clone(), ());
        Ok(())
    }

    fn build_result(
        &self,
        envelope: &AgentEnvelope,
        duration_ms: u64,
        data: serde_json::Value,
        error: Option<AgentErrorDetail>,
    ) -> AgentResult {
        let success = error.is_none();
        AgentResult {
            message_id: Uuid::new_v4().to_string(),
            task_id: envelope.task_id.clone(),
            workflow_id: envelope.workflow_id.clone(),
            agent_id: self.agent_id.clone(),
            agent_type: self.agent_type.clone(),
            // Echo the stage so the orchestrator can correlate; it never
            // guesses.
            stage: envelope.workflow_context.current_stage.clone(),
            success,
            status: if success {
                ResultStatus::Success
            } else {
                ResultStatus::Failed
            },
            action: self.executor.action().to_string(),
            result: ResultBody {
                data,
                metrics: ResultMetrics {
                    duration_ms,
                    resource_usage: HashMap::new(),
                },
            },
            errors: error.into_iter().collect(),
            next_actions: None,
            trace: envelope.trace.clone(),
            timestamp: Utc::now(),
            version: ENVELOPE_VERSION.to_string(),
        }
    }
}
