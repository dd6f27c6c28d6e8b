// ADE Core - Persisted agent task record
//
// One AgentTask row per dispatch attempt for a stage. Tasks are recreated
// fresh per stage, never reused; terminal status is final.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::{AgentEnvelope, Priority};

/// Task lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Row persisted, publish not yet confirmed
    Pending,
    /// Published to the agent's task channel
    Dispatched,
    /// An agent reported starting the task
    Running,
    /// Terminal - result consumed successfully
    Succeeded,
    /// Terminal - result reported failure, or the task timed out
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

/// Persisted record of one stage dispatch attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    /// Stable identifier, also referenced by the envelope
    pub task_id: String,

    /// Owning workflow
    pub workflow_id: String,

    /// Stage this task executes
    pub stage: String,

    /// Agent type the task was dispatched to
    pub agent_type: String,

    /// Lifecycle status
    pub status: TaskStatus,

    /// Scheduling priority
    pub priority: Priority,

    /// Full envelope as persisted payload, kept for replay
    pub envelope: AgentEnvelope,

    /// Trace id (denormalized from the envelope for indexed lookup)
    pub trace_id: String,

    /// Span covering this task
    pub span_id: String,

    /// Parent span
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last status-change timestamp
    pub updated_at: DateTime<Utc>,

    /// When the envelope was confirmed published
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
}

impl AgentTask {
    /// Build the pending task row for an envelope about to be dispatched.
    pub fn pending(envelope: AgentEnvelope) -> Self {
        let now = Utc::now();
        Self {
            task_id: envelope.task_id.clone(),
            workflow_id: envelope.workflow_id.clone(),
            stage: envelope.workflow_context.current_stage.clone(),
            agent_type: envelope.agent_type.clone(),
            status: TaskStatus::Pending,
            priority: envelope.priority,
            trace_id: envelope.trace.trace_id.clone(),
            span_id: envelope.trace.span_id.clone(),
            parent_span_id: envelope.trace.parent_span_id.clone(),
            envelope,
            created_at: now,
            updated_at: now,
            dispatched_at: None,
        }
    }

    /// Whether this task has exceeded its envelope timeout as of `now`.
    pub fn timed_out_at(&self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || self.status == TaskStatus::Pending {
            return false;
        }
        let reference = self.dispatched_at.unwrap_or(self.created_at);
        let age_ms = now.signed_duration_since(reference).num_milliseconds();
        age_ms >= 0 && (age_ms as u64) >= self.envelope.constraints.timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::tests::sample_envelope;
    use chrono::Duration;

    #[test]
    fn test_pending_task_mirrors_envelope() {
        let envelope = sample_envelope();
        let task = AgentTask::pending(envelope.clone());
        assert_eq!(task.task_id, envelope.task_id);
        assert_eq!(task.stage, "scaffolding");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.trace_id, envelope.trace.trace_id);
        assert!(task.dispatched_at.is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Dispatched.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn test_timeout_detection() {
        let mut task = AgentTask::pending(sample_envelope());
        task.status = TaskStatus::Dispatched;
        task.dispatched_at = Some(Utc::now() - Duration::milliseconds(400_000));
        assert!(task.timed_out_at(Utc::now()));

        task.dispatched_at = Some(Utc::now());
        assert!(!task.timed_out_at(Utc::now()));
    }

    #[test]
    fn test_pending_tasks_never_time_out() {
        let mut task = AgentTask::pending(sample_envelope());
        task.created_at = Utc::now() - Duration::milliseconds(900_000);
        assert!(!task.timed_out_at(Utc::now()));
    }
}
