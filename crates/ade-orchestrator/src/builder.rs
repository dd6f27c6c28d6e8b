// EnvelopeBuilder - sole producer of AgentEnvelope v2.0.0
//
// No other component constructs envelopes. The builder stamps fresh
// message/task/span ids, pulls constraints from the active stage definition
// (or the engine defaults), embeds the full workflow context so agents read
// their inputs exclusively from the envelope, and round-trips the result
// through the schema before handing it to the dispatcher.

use chrono::Utc;
use uuid::Uuid;

use ade_core::{
    AdeResult, AgentEnvelope, Constraints, EnvelopeMetadata, EnvelopeStatus, Priority,
    StageDefinition, TraceContext, Workflow, WorkflowContext, DEFAULT_MAX_RETRIES,
    DEFAULT_REQUIRED_CONFIDENCE, DEFAULT_TIMEOUT_MS, ENVELOPE_VERSION,
};

/// Builder for task envelopes
pub struct EnvelopeBuilder;

impl EnvelopeBuilder {
    /// Build the envelope for dispatching `stage` of `workflow` to
    /// `agent_type`. The fresh span id becomes the workflow's
    /// current_span_id once the transition persists; the previous one is
    /// carried as the parent span.
    pub fn build(
        workflow: &Workflow,
        stage: &str,
        agent_type: &str,
        stage_definition: Option<&StageDefinition>,
        created_by: &str,
    ) -> AdeResult<AgentEnvelope> {
        let constraints = Constraints {
            timeout_ms: stage_definition
                .and_then(|s| s.timeout_ms)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
            max_retries: stage_definition
                .and_then(|s| s.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            required_confidence: DEFAULT_REQUIRED_CONFIDENCE,
        };

        let payload = workflow
            .input_data
            .as_object()
            .cloned()
            .unwrap_or_default();

        let envelope = AgentEnvelope {
            message_id: Uuid::new_v4().to_string(),
            task_id: Uuid::new_v4().to_string(),
            workflow_id: workflow.id.clone(),
            agent_type: agent_type.to_string(),
            priority: Priority::default(),
            status: EnvelopeStatus::Pending,
            constraints,
            retry_count: 0,
            payload,
            metadata: EnvelopeMetadata {
                created_at: Utc::now(),
                created_by: created_by.to_string(),
                envelope_version: ENVELOPE_VERSION.to_string(),
            },
            trace: TraceContext {
                trace_id: workflow.trace_id.clone(),
                span_id: Uuid::new_v4().to_string(),
                parent_span_id: Some(workflow.current_span_id.clone()),
            },
            workflow_context: WorkflowContext {
                workflow_type: workflow.workflow_type.clone(),
                workflow_name: workflow.name.clone(),
                current_stage: stage.to_string(),
                stage_outputs: workflow.stage_outputs.clone(),
                surface_context: workflow.surface_context(),
            },
        };

        // Schema self-check; a failure here is a programmer error.
        envelope.round_trip_check()?;
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ade_core::{CreateWorkflowRequest, StageRoute};

    fn workflow() -> Workflow {
        let mut workflow = Workflow::new(
            &CreateWorkflowRequest {
                workflow_type: "ml-training".to_string(),
                name: "train-v2".to_string(),
                platform_id: Some("p1".to_string()),
                workflow_definition_id: None,
                input_data: serde_json::json!({"dataset": "s3://bucket/train"}),
            },
            None,
        );
        workflow.record_stage_output(
            "data-preparation",
            serde_json::json!({"rows": 120_000}),
        );
        workflow
    }

    #[test]
    fn test_build_uses_defaults_without_stage_definition() {
        let workflow = workflow();
        let envelope =
            EnvelopeBuilder::build(&workflow, "model-training", "ml-training", None, "svc")
                .unwrap();

        assert_eq!(envelope.constraints.timeout_ms, 300_000);
        assert_eq!(envelope.constraints.max_retries, 3);
        assert_eq!(envelope.constraints.required_confidence, 80);
        assert_eq!(envelope.metadata.envelope_version, "2.0.0");
    }

    #[test]
    fn test_build_uses_stage_overrides() {
        let workflow = workflow();
        let stage = StageDefinition {
            name: "model-training".to_string(),
            agent_type: "ml-training".to_string(),
            weight: 50,
            timeout_ms: Some(1_800_000),
            max_retries: Some(1),
            on_success: StageRoute::End,
            on_failure: StageRoute::End,
        };
        let envelope =
            EnvelopeBuilder::build(&workflow, "model-training", "ml-training", Some(&stage), "svc")
                .unwrap();

        assert_eq!(envelope.constraints.timeout_ms, 1_800_000);
        assert_eq!(envelope.constraints.max_retries, 1);
    }

    #[test]
    fn test_trace_propagation() {
        let workflow = workflow();
        let envelope =
            EnvelopeBuilder::build(&workflow, "model-training", "ml-training", None, "svc")
                .unwrap();

        assert_eq!(envelope.trace.trace_id, workflow.trace_id);
        assert_eq!(
            envelope.trace.parent_span_id.as_deref(),
            Some(workflow.current_span_id.as_str())
        );
        assert_ne!(envelope.trace.span_id, workflow.current_span_id);
    }

    #[test]
    fn test_context_carries_predecessor_outputs() {
        let workflow = workflow();
        let envelope =
            EnvelopeBuilder::build(&workflow, "model-training", "ml-training", None, "svc")
                .unwrap();

        assert_eq!(envelope.workflow_context.current_stage, "model-training");
        assert!(envelope
            .workflow_context
            .stage_outputs
            .contains_key("data-preparation"));
    }

    #[test]
    fn test_fresh_ids_per_build() {
        let workflow = workflow();
        let a = EnvelopeBuilder::build(&workflow, "s", "t", None, "svc").unwrap();
        let b = EnvelopeBuilder::build(&workflow, "s", "t", None, "svc").unwrap();
        assert_ne!(a.message_id, b.message_id);
        assert_ne!(a.task_id, b.task_id);
        assert_ne!(a.trace.span_id, b.trace.span_id);
    }
}
