// ADE Core - Workflow audit events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of audit events appended per workflow
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowEventKind {
    WorkflowCreated,
    StageDispatched,
    StageCompleted,
    StageFailed,
    StageSkipped,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
}

/// One audit entry. Appended after every state transition; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Stable event id
    pub event_id: String,

    /// Workflow the event belongs to
    pub workflow_id: String,

    /// Event kind
    pub kind: WorkflowEventKind,

    /// Stage the event refers to, when stage-scoped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Free-form detail (failure reasons, router fallback flags, ...)
    #[serde(default)]
    pub detail: serde_json::Value,

    /// Event timestamp
    pub created_at: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(workflow_id: impl Into<String>, kind: WorkflowEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.into(),
            kind,
            stage: None,
            detail: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&WorkflowEventKind::WorkflowFailed).unwrap(),
            "\"WORKFLOW_FAILED\""
        );
        let kind: WorkflowEventKind = serde_json::from_str("\"STAGE_SKIPPED\"").unwrap();
        assert_eq!(kind, WorkflowEventKind::StageSkipped);
    }

    #[test]
    fn test_builder() {
        let event = WorkflowEvent::new("wf-1", WorkflowEventKind::StageFailed)
            .with_stage("validation")
            .with_detail(serde_json::json!({"reason": "timeout"}));
        assert_eq!(event.stage.as_deref(), Some("validation"));
        assert_eq!(event.detail["reason"], "timeout");
        assert!(!event.event_id.is_empty());
    }
}
