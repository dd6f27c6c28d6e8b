// Agent registry - liveness view over the persisted agent records
//
// Keyed by free-string agent_type. Consulted before any dispatch and by the
// pre-creation validation pass. Heartbeats keep records online; stale
// records stop counting without being deleted.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::agent::{AgentRecord, AgentStatus};
use crate::error::{AdeError, AdeResult};
use crate::store::StoreRef;

/// Heartbeats older than this mark the agent offline
const DEFAULT_STALE_AFTER_SECS: i64 = 60;

/// Registry of live agent executors
pub struct AgentRegistry {
    store: StoreRef,
    stale_after: Duration,
}

impl AgentRegistry {
    pub fn new(store: StoreRef) -> Self {
        Self {
            store,
            stale_after: Duration::seconds(DEFAULT_STALE_AFTER_SECS),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Register (or re-register) an agent instance as online.
    pub async fn register(&self, mut record: AgentRecord) -> AdeResult<()> {
        record.status = AgentStatus::Online;
        record.last_heartbeat = Utc::now();
        info!(agent_id = %record.agent_id, agent_type = %record.agent_type, "agent registered");
        self.store.upsert_agent(&record).await
    }

    /// Refresh an agent's heartbeat, bringing it back online if it had gone
    /// stale.
    pub async fn heartbeat(&self, agent_id: &str) -> AdeResult<()> {
        let agents = self.store.list_agents().await?;
        let Some(mut record) = agents.into_iter().find(|a| a.agent_id == agent_id) else {
            return Err(AdeError::NotFound(format!(
                "agent {} is not registered",
                agent_id
            )));
        };
        record.last_heartbeat = Utc::now();
        record.status = AgentStatus::Online;
        self.store.upsert_agent(&record).await
    }

    /// Whether at least one online, fresh agent of the type exists (scoped
    /// to the platform when the instance is platform-pinned).
    pub async fn validate_agent_exists(
        &self,
        agent_type: &str,
        platform_id: Option<&str>,
    ) -> AdeResult<bool> {
        let cutoff = Utc::now() - self.stale_after;
        let agents = self.store.agents_by_type(agent_type).await?;
        let available = agents.iter().any(|a| {
            a.status == AgentStatus::Online
                && a.last_heartbeat >= cutoff
                && a.serves_platform(platform_id)
        });
        if !available {
            debug!(agent_type, ?platform_id, "no online agent for type");
        }
        Ok(available)
    }

    /// Subset of `agent_types` that have no online agent. Used by the
    /// pre-creation validation pass to fail fast.
    pub async fn missing_agent_types(
        &self,
        agent_types: &[&str],
        platform_id: Option<&str>,
    ) -> AdeResult<Vec<String>> {
        let mut missing = Vec::new();
        for agent_type in agent_types {
            if !self.validate_agent_exists(agent_type, platform_id).await? {
                missing.push((*agent_type).to_string());
            }
        }
        Ok(missing)
    }

    /// Flip stale records to offline. Returns how many were demoted.
    pub async fn demote_stale(&self) -> AdeResult<usize> {
        let cutoff = Utc::now() - self.stale_after;
        let mut demoted = 0;
        for mut record in self.store.list_agents().await? {
            if record.status == AgentStatus::Online && record.last_heartbeat < cutoff {
                record.status = AgentStatus::Offline;
                self.store.upsert_agent(&record).await?;
                demoted += 1;
            }
        }
        if demoted > 0 {
            info!(demoted, "marked stale agents offline");
        }
        Ok(demoted)
    }
}

/// Shared registry reference
pub type RegistryRef = Arc<AgentRegistry>;
