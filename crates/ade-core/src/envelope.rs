// ADE Core - Agent task envelope (schema v2.0.0)
//
// The envelope is the sole task contract between the orchestrator and
// agents. One schema version; all sections nested; no flat aliases. Any
// schema change is a new version with an explicit migration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{AdeError, AdeResult};
use crate::workflow::SurfaceContext;

/// The only envelope version this engine produces or accepts.
pub const ENVELOPE_VERSION: &str = "2.0.0";

/// Default stage timeout when the definition does not override it.
pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;

/// Default retry budget when the definition does not override it.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default confidence floor handed to agents.
pub const DEFAULT_REQUIRED_CONFIDENCE: u32 = 80;

/// Task priority
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Envelope lifecycle status as stamped by the producer
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    #[default]
    Pending,
    Queued,
    Running,
}

/// Execution constraints handed to the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Constraints {
    /// Wall-clock budget for the stage in milliseconds
    pub timeout_ms: u64,

    /// Retry budget the agent may spend internally
    pub max_retries: u32,

    /// Minimum confidence (0-100) the agent should reach before reporting
    /// success
    pub required_confidence: u32,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            required_confidence: DEFAULT_REQUIRED_CONFIDENCE,
        }
    }
}

/// Envelope provenance metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvelopeMetadata {
    /// Producer-side creation time
    pub created_at: DateTime<Utc>,

    /// Principal that created the workflow
    pub created_by: String,

    /// Schema version literal; always "2.0.0"
    pub envelope_version: String,
}

/// Distributed trace context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceContext {
    /// Trace id shared by every message of one workflow
    pub trace_id: String,

    /// Span covering this task
    pub span_id: String,

    /// Span of the step that caused this task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
}

/// Workflow-level context embedded so agents read their inputs exclusively
/// from the envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowContext {
    /// Free-form workflow type tag
    pub workflow_type: String,

    /// Workflow name
    pub workflow_name: String,

    /// Stage this task executes
    pub current_stage: String,

    /// Outputs of all completed predecessor stages
    #[serde(default)]
    pub stage_outputs: HashMap<String, serde_json::Value>,

    /// Surface context the workflow entered through, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surface_context: Option<SurfaceContext>,
}

/// AgentEnvelope v2.0.0 - the canonical task message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentEnvelope {
    /// Idempotency key; fresh per publish attempt, distinct from task_id
    pub message_id: String,

    /// Persisted task row this envelope belongs to
    pub task_id: String,

    /// Owning workflow
    pub workflow_id: String,

    /// Free-string agent type selecting the task channel
    pub agent_type: String,

    /// Scheduling priority
    #[serde(default)]
    pub priority: Priority,

    /// Producer-side lifecycle status
    #[serde(default)]
    pub status: EnvelopeStatus,

    /// Execution constraints
    pub constraints: Constraints,

    /// Times this task has been re-dispatched
    #[serde(default)]
    pub retry_count: u32,

    /// Agent-specific opaque payload
    #[serde(default)]
    pub payload: serde_json::Map<String, serde_json::Value>,

    /// Provenance metadata
    pub metadata: EnvelopeMetadata,

    /// Trace context
    pub trace: TraceContext,

    /// Workflow context including predecessor outputs
    pub workflow_context: WorkflowContext,
}

impl AgentEnvelope {
    /// Parse an envelope from a JSON value, reporting the exact path of any
    /// schema mismatch.
    pub fn from_json(value: serde_json::Value) -> AdeResult<Self> {
        let envelope: AgentEnvelope = serde_path_to_error::deserialize(value)
            .map_err(|e| AdeError::Validation(format!("envelope schema: {}", e)))?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Structural checks beyond what serde enforces.
    pub fn validate(&self) -> AdeResult<()> {
        if self.metadata.envelope_version != ENVELOPE_VERSION {
            return Err(AdeError::Validation(format!(
                "unsupported envelope version '{}' (expected {})",
                self.metadata.envelope_version, ENVELOPE_VERSION
            )));
        }
        for (field, value) in [
            ("message_id", &self.message_id),
            ("task_id", &self.task_id),
            ("workflow_id", &self.workflow_id),
            ("agent_type", &self.agent_type),
        ] {
            if value.is_empty() {
                return Err(AdeError::Validation(format!("envelope {} is empty", field)));
            }
        }
        if self.workflow_context.current_stage.is_empty() {
            return Err(AdeError::Validation(
                "envelope workflow_context.current_stage is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Round-trip the envelope through its own schema. A failure here is a
    /// programmer error surfaced as Internal, not a runtime condition.
    pub fn round_trip_check(&self) -> AdeResult<()> {
        let value = serde_json::to_value(self)?;
        let parsed = AgentEnvelope::from_json(value)
            .map_err(|e| AdeError::Internal(format!("envelope failed self round-trip: {}", e)))?;
        if &parsed != self {
            return Err(AdeError::Internal(
                "envelope round-trip produced a different value".to_string(),
            ));
        }
        Ok(())
    }
}
