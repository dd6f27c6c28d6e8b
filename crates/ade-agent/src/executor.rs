// StageExecutor - the trait a concrete agent implements
//
// The runtime hands executors the full envelope, never a reshaped subset;
// an executor reads its inputs exclusively from it.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use ade_core::{AdeError, AdeResult, AgentEnvelope};

/// Type-specific stage executor
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Action label stamped onto results (e.g. "execute_scaffold")
    fn action(&self) -> &str;

    /// Execute one stage. The returned value becomes the stage's output
    /// blob; an error becomes a failed AgentResult, not an engine error.
    async fn execute(&self, envelope: &AgentEnvelope) -> AdeResult<serde_json::Value>;
}

/// Payload key under which a per-envelope behavior instruction travels.
/// Instruction-honoring executors check it before their stage scripts.
pub const PAYLOAD_BEHAVIOR_KEY: &str = "scripted_behavior";

/// Scripted behavior for one stage or envelope, used by tests and demos
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptedBehavior {
    /// Return this output
    Succeed(serde_json::Value),
    /// Fail with this error
    Fail {
        code: String,
        message: String,
        recoverable: bool,
    },
    /// Panic mid-execution, simulating an agent process crash before any
    /// result is published. The inbound task is never acknowledged.
    Panic,
}

/// Executor with scripted behaviors, selected per stage at construction
/// time or per envelope through the `scripted_behavior` payload key when
/// instruction-honoring is enabled. Stages without a script succeed with a
/// minimal output.
pub struct ScriptedExecutor {
    action: String,
    honor_payload: bool,
    behaviors: DashMap<String, ScriptedBehavior>,
}

impl ScriptedExecutor {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            honor_payload: false,
            behaviors: DashMap::new(),
        }
    }

    /// Script the behavior of one stage.
    pub fn on_stage(self, stage: impl Into<String>, behavior: ScriptedBehavior) -> Self {
        self.behaviors.insert(stage.into(), behavior);
        self
    }

    /// Obey `scripted_behavior` instructions carried in envelope payloads.
    /// Payload instructions take precedence over stage scripts.
    pub fn honoring_payload(mut self) -> Self {
        self.honor_payload = true;
        self
    }

    fn run(&self, stage: &str, behavior: ScriptedBehavior) -> AdeResult<serde_json::Value> {
        match behavior {
            ScriptedBehavior::Succeed(output) => Ok(output),
            ScriptedBehavior::Fail { code, message, .. } => {
                Err(AdeError::Internal(format!("{}: {}", code, message)))
            }
            ScriptedBehavior::Panic => {
                panic!("scripted crash while executing stage '{}'", stage)
            }
        }
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    fn action(&self) -> &str {
        &self.action
    }

    async fn execute(&self, envelope: &AgentEnvelope) -> AdeResult<serde_json::Value> {
        let stage = &envelope.workflow_context.current_stage;

        if self.honor_payload {
            if let Some(instruction) = envelope.payload.get(PAYLOAD_BEHAVIOR_KEY) {
                let behavior: ScriptedBehavior = serde_json::from_value(instruction.clone())
                    .map_err(|e| {
                        AdeError::Validation(format!("bad scripted_behavior payload: {}", e))
                    })?;
                return self.run(stage, behavior);
            }
        }

        match self.behaviors.get(stage.as_str()).map(|b| b.clone()) {
            Some(behavior) => self.run(stage, behavior),
            None => Ok(serde_json::json!({
                "stage": stage,
                "handled_by": envelope.agent_type,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ade_core::{
        Constraints, EnvelopeMetadata, EnvelopeStatus, Priority, TraceContext, WorkflowContext,
        ENVELOPE_VERSION,
    };
    use chrono::Utc;
    use std::collections::HashMap;

    fn envelope(stage: &str) -> AgentEnvelope {
        AgentEnvelope {
            message_id: "m".to_string(),
            task_id: "t".to_string(),
            workflow_id: "w".to_string(),
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
                trace_id: "tr".to_string(),
                span_id: "sp".to_string(),
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

    fn envelope_with_instruction(stage: &str, instruction: serde_json::Value) -> AgentEnvelope {
        let mut envelope = envelope(stage);
        envelope
            .payload
            .insert(PAYLOAD_BEHAVIOR_KEY.to_string(), instruction);
        envelope
    }

    #[tokio::test]
    async fn test_default_behavior_succeeds() {
        let executor = ScriptedExecutor::new("execute_scaffold");
        let output = executor.execute(&envelope("scaffolding")).await.unwrap();
        assert_eq!(output["stage"], "scaffolding");
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let executor = ScriptedExecutor::new("execute_validation").on_stage(
            "validation",
            ScriptedBehavior::Fail {
                code: "LINT".to_string(),
                message: "3 errors".to_string(),
                recoverable: true,
            },
        );
        assert!(executor.execute(&envelope("validation")).await.is_err());
        // Other stages keep the default behavior.
        assert!(executor.execute(&envelope("e2e")).await.is_ok());
    }

    #[tokio::test]
    async fn test_payload_instruction_selects_behavior() {
        let executor = ScriptedExecutor::new("execute_scaffold").honoring_payload();

        let succeed = envelope_with_instruction(
            "scaffolding",
            serde_json::json!({"succeed": {"files": 3}}),
        );
        let output = executor.execute(&succeed).await.unwrap();
        assert_eq!(output["files"], 3);

        let fail = envelope_with_instruction(
            "scaffolding",
            serde_json::json!({"fail": {"code": "BOOM", "message": "no", "recoverable": false}}),
        );
        let err = executor.execute(&fail).await.unwrap_err();
        assert!(err.to_string().contains("BOOM"));
    }

    #[tokio::test]
    async fn test_payload_instruction_ignored_without_opt_in() {
        let executor = ScriptedExecutor::new("execute_scaffold");
        let envelope = envelope_with_instruction("scaffolding", serde_json::json!("panic"));
        // No honoring_payload(): the instruction is inert and the default
        // stage behavior runs.
        let output = executor.execute(&envelope).await.unwrap();
        assert_eq!(output["stage"], "scaffolding");
    }

    #[tokio::test]
    #[should_panic(expected = "scripted crash")]
    async fn test_payload_panic_instruction_crashes() {
        let executor = ScriptedExecutor::new("execute_scaffold").honoring_payload();
        let envelope = envelope_with_instruction("scaffolding", serde_json::json!("panic"));
        let _ = executor.execute(&envelope).await;
    }

    #[tokio::test]
    async fn test_malformed_instruction_is_a_validation_error() {
        let executor = ScriptedExecutor::new("execute_scaffold").honoring_payload();
        let envelope =
            envelope_with_instruction("scaffolding", serde_json::json!({"explode": true}));
        let err = executor.execute(&envelope).await.unwrap_err();
        assert!(matches!(err, AdeError::Validation(_)));
    }
}
