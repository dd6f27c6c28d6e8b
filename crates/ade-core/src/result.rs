// ADE Core - Agent result message
//
// Results flow back on the shared orchestrator:results channel. The outer
// `stage` field is mandatory: it is the only way the orchestrator correlates
// a result with the stage it closes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::envelope::TraceContext;
use crate::error::{AdeError, AdeResult};

/// Result status. The canonical failure value is `"failed"`; the historical
/// `"failure"` spelling is a validation error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failed,
    Cancelled,
}

/// Structured error reported by an agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentErrorDetail {
    /// Machine-readable code (e.g. "TIMEOUT", "EXECUTOR_PANIC")
    pub code: String,

    /// Human-readable message
    pub message: String,

    /// Whether the orchestrator may usefully retry the stage
    pub recoverable: bool,
}

/// Execution metrics attached to every result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultMetrics {
    /// Wall-clock duration of the stage execution
    pub duration_ms: u64,

    /// Free-form resource accounting (tokens, bytes, cpu_ms, ...)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub resource_usage: HashMap<String, serde_json::Value>,
}

/// Result body: the stage's output data plus metrics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultBody {
    /// Opaque output blob stored into the workflow's stage_outputs
    #[serde(default)]
    pub data: serde_json::Value,

    /// Execution metrics
    pub metrics: ResultMetrics,
}

/// AgentResult - the message agents publish when a stage finishes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentResult {
    /// Fresh idempotency key for this result publication
    pub message_id: String,

    /// Task this result closes
    pub task_id: String,

    /// Owning workflow
    pub workflow_id: String,

    /// Concrete agent instance that executed the task
    pub agent_id: String,

    /// Agent type of the executor
    pub agent_type: String,

    /// Stage this result closes. Mandatory for correlation; the orchestrator
    /// never guesses.
    pub stage: String,

    /// Overall success flag
    pub success: bool,

    /// Result status
    pub status: ResultStatus,

    /// Action the agent performed (e.g. "execute_scaffold")
    pub action: String,

    /// Output data and metrics
    pub result: ResultBody,

    /// Errors, present when the stage failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<AgentErrorDetail>,

    /// Optional hint at follow-up actions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_actions: Option<Vec<String>>,

    /// Trace context echoed from the envelope
    pub trace: TraceContext,

    /// Publication timestamp
    pub timestamp: DateTime<Utc>,

    /// Result schema version
    pub version: String,
}

impl AgentResult {
    /// Parse a result from a JSON value with exact-path diagnostics.
    pub fn from_json(value: serde_json::Value) -> AdeResult<Self> {
        let result: AgentResult = serde_path_to_error::deserialize(value)
            .map_err(|e| AdeError::Validation(format!("result schema: {}", e)))?;
        result.validate()?;
        Ok(result)
    }

    /// Structural checks beyond serde.
    pub fn validate(&self) -> AdeResult<()> {
        if self.workflow_id.is_empty() {
            return Err(AdeError::Validation("result workflow_id is empty".to_string()));
        }
        if self.stage.is_empty() {
            return Err(AdeError::Validation("result stage is empty".to_string()));
        }
        if self.agent_id.is_empty() {
            return Err(AdeError::Validation("result agent_id is empty".to_string()));
        }
        // success flag and status must agree
        let status_success = self.status == ResultStatus::Success;
        if self.success != status_success {
            return Err(AdeError::Validation(format!(
                "result success={} contradicts status={:?}",
                self.success, self.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_result() -> AgentResult {
        AgentResult {
            message_id: "rmsg-1".to_string(),
            task_id: "task-1".to_string(),
            workflow_id: "wf-1".to_string(),
            agent_id: "scaffold-agent-1".to_string(),
            agent_type: "scaffold".to_string(),
            stage: "scaffolding".to_string(),
            success: true,
            status: ResultStatus::Success,
            action: "execute_scaffold".to_string(),
            result: ResultBody {
                data: serde_json::json!({"files": 12}),
                metrics: ResultMetrics {
                    duration_ms: 1532,
                    resource_usage: HashMap::new(),
                },
            },
            errors: Vec::new(),
            next_actions: None,
            trace: TraceContext {
                trace_id: "trace-1".to_string(),
                span_id: "span-2".to_string(),
                parent_span_id: Some("span-1".to_string()),
            },
            timestamp: Utc::now(),
            version: "2.0.0".to_string(),
        }
    }

    #[test]
    fn test_round_trip() {
        let result = sample_result();
        let json = serde_json::to_value(&result).unwrap();
        let parsed = AgentResult::from_json(json).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn test_failure_spelling_rejected() {
        let mut value = serde_json::to_value(sample_result()).unwrap();
        value["status"] = serde_json::json!("failure");
        value["success"] = serde_json::json!(false);
        let err = AgentResult::from_json(value).unwrap_err();
        assert!(matches!(err, AdeError::Validation(_)));
        assert!(err.to_string().contains("status"), "got: {err}");
    }

    #[test]
    fn test_missing_stage_rejected() {
        let mut value = serde_json::to_value(sample_result()).unwrap();
        value.as_object_mut().unwrap().remove("stage");
        assert!(AgentResult::from_json(value).is_err());
    }

    #[test]
    fn test_success_status_contradiction_rejected() {
        let mut result = sample_result();
        result.success = false;
        let err = result.validate().unwrap_err();
        assert!(err.to_string().contains("contradicts"));
    }

    #[test]
    fn test_failed_result_with_errors() {
        let mut result = sample_result();
        result.success = false;
        result.status = ResultStatus::Failed;
        result.errors = vec![AgentErrorDetail {
            code: "VALIDATION_FAILED".to_string(),
            message: "3 lint errors".to_string(),
            recoverable: true,
        }];
        assert!(result.validate().is_ok());

        let json = serde_json::to_value(&result).unwrap();
        let parsed = AgentResult::from_json(json).unwrap();
        assert_eq!(parsed.errors.len(), 1);
        assert!(parsed.errors[0].recoverable);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ResultStatus::Failed).unwrap(),
            "\"failed\""
        );
        assert!(serde_json::from_str::<ResultStatus>("\"failure\"").is_err());
    }
}
