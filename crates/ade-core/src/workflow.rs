// ADE Core - Workflow aggregate
//
// A Workflow is one ordered execution of stages for a unit of work. The
// orchestrator owns the row; agents only ever see projections of it inside
// task envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::platform::SurfaceType;

/// Workflow execution status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Row written, first task not yet dispatched
    Initiated,
    /// At least one task dispatched, not yet terminal
    Running,
    /// Terminal - success
    Completed,
    /// Terminal - failure
    Failed,
    /// Terminal - external cancel
    Cancelled,
}

impl WorkflowStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }
}

/// Surface context attached to a workflow at ingress and propagated into
/// every subsequent envelope's workflow context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurfaceContext {
    /// Identifier of the concrete surface instance
    pub surface_id: String,

    /// Surface type (must be bound and enabled on the platform)
    pub surface_type: SurfaceType,

    /// Platform the surface belongs to
    pub platform_id: String,

    /// Opaque per-entry metadata (request headers, webhook delivery id, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_metadata: Option<serde_json::Value>,
}

/// Workflow - root aggregate of the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Stable identifier (uuid)
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Free-form type tag ("app", "bugfix", "ml-training", ...). Selects the
    /// legacy stage sequence when no definition resolves.
    #[serde(rename = "type")]
    pub workflow_type: String,

    /// Owning platform, if any. Absent for legacy workflows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_id: Option<String>,

    /// Pinned workflow definition, if the caller selected one explicitly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_definition_id: Option<String>,

    /// Name of the stage currently executing (or about to)
    pub current_stage: String,

    /// Execution status
    pub status: WorkflowStatus,

    /// Progress 0-100. Monotonic until terminal; recomputed from stage
    /// weights on every transition.
    pub progress: u8,

    /// Outputs of completed stages, keyed by stage name
    #[serde(default)]
    pub stage_outputs: HashMap<String, serde_json::Value>,

    /// Stages traversed via `skip` routing. They contribute their weight to
    /// progress but deliberately leave no entry in stage_outputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_stages: Vec<String>,

    /// Creation-time payload. Carries `surface_context` when the workflow
    /// entered through a bound surface.
    #[serde(default)]
    pub input_data: serde_json::Value,

    /// Trace id propagated into every envelope
    pub trace_id: String,

    /// Span id of the currently outstanding stage; becomes the parent span
    /// of the next envelope.
    pub current_span_id: String,

    /// Optimistic concurrency token. Bumped by every successful
    /// compare-and-swap write.
    #[serde(default)]
    pub version: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create a fresh workflow row in `initiated` status with a new trace.
    pub fn new(request: &CreateWorkflowRequest, surface_context: Option<&SurfaceContext>) -> Self {
        let now = Utc::now();
        let mut input_data = request.input_data.clone();
        if !input_data.is_object() {
            input_data = serde_json::json!({ "payload": input_data });
        }
        if let Some(ctx) = surface_context {
            if let Some(obj) = input_data.as_object_mut() {
                obj.insert(
                    "surface_context".to_string(),
                    serde_json::to_value(ctx).unwrap_or(serde_json::Value::Null),
                );
            }
        }

        Self {
            id: Uuid::new_v4().to_string(),
            name: request.name.clone(),
            workflow_type: request.workflow_type.clone(),
            platform_id: request.platform_id.clone(),
            workflow_definition_id: request.workflow_definition_id.clone(),
            current_stage: String::new(),
            status: WorkflowStatus::Initiated,
            progress: 0,
            stage_outputs: HashMap::new(),
            skipped_stages: Vec::new(),
            input_data,
            trace_id: Uuid::new_v4().to_string(),
            current_span_id: Uuid::new_v4().to_string(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parse the surface context out of `input_data`, if present.
    pub fn surface_context(&self) -> Option<SurfaceContext> {
        self.input_data
            .get("surface_context")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Record a completed stage's output and touch the update timestamp.
    pub fn record_stage_output(&mut self, stage: &str, output: serde_json::Value) {
        self.stage_outputs.insert(stage.to_string(), output);
        self.updated_at = Utc::now();
    }
}

/// Workflow creation request, as accepted at ingress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkflowRequest {
    /// Free-form workflow type tag
    #[serde(rename = "type")]
    pub workflow_type: String,

    /// Human-readable name
    pub name: String,

    /// Target platform
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_id: Option<String>,

    /// Explicit definition selection (otherwise the platform's enabled
    /// definitions are consulted)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_definition_id: Option<String>,

    /// Opaque creation payload handed to the first stage
    #[serde(default)]
    pub input_data: serde_json::Value,
}

/// Read-only projection returned to dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub workflow_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_id: Option<String>,
    pub current_stage: String,
    pub status: WorkflowStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id.clone(),
            name: workflow.name.clone(),
            workflow_type: workflow.workflow_type.clone(),
            platform_id: workflow.platform_id.clone(),
            current_stage: workflow.current_stage.clone(),
            status: workflow.status,
            progress: workflow.progress,
            created_at: workflow.created_at,
            updated_at: workflow.updated_at,
        }
    }
}
