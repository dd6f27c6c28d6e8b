// ADE Core - Agent registry records
//
// Agent types are free-text strings; the engine has no compile-time
// knowledge of them. Extensibility is purely runtime: an agent registers
// under a type, and dispatch asserts one is online.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness status of a registered agent instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
    Degraded,
}

/// Registry entry for one agent instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Unique instance id (one per process)
    pub agent_id: String,

    /// Free-text agent type; selects the task channel the instance consumes
    pub agent_type: String,

    /// Optional platform scope. Scoped agents only serve workflows of that
    /// platform.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_id: Option<String>,

    /// Liveness status
    pub status: AgentStatus,

    /// Advertised capabilities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,

    /// Last heartbeat timestamp
    pub last_heartbeat: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(agent_id: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            platform_id: None,
            status: AgentStatus::Online,
            capabilities: Vec::new(),
            last_heartbeat: Utc::now(),
        }
    }

    /// Scope the agent to a platform.
    pub fn with_platform(mut self, platform_id: impl Into<String>) -> Self {
        self.platform_id = Some(platform_id.into());
        self
    }

    /// Whether this instance may serve a workflow of the given platform.
    pub fn serves_platform(&self, platform_id: Option<&str>) -> bool {
        match (&self.platform_id, platform_id) {
            (None, _) => true,
            (Some(scope), Some(requested)) => scope == requested,
            (Some(_), None) => false,
        }
    }
}
