// ADE Core - Engine configuration
//
// YAML configuration with ${VAR} environment expansion. Ports and surface
// configuration belong to the entry-surface collaborators, not the core.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AdeError, AdeResult};

/// Substrate connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubstrateConfig {
    /// Connection URL (e.g. "redis://127.0.0.1:6379")
    pub url: String,

    /// Namespace prefixed onto every channel and stream name
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "ade".to_string()
}

/// Persistence connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Connection URL of the backing store
    pub url: String,
}

/// Observability exporter settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Trace/metric exporter endpoint, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exporter_endpoint: Option<String>,
}

/// Reaper cadence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// How often to scan for timed-out tasks
    #[serde(default = "default_timeout_scan_interval_ms")]
    pub timeout_scan_interval_ms: u64,

    /// How often to retry publishing tasks stuck in pending
    #[serde(default = "default_pending_retry_interval_ms")]
    pub pending_retry_interval_ms: u64,

    /// How often to demote agents with stale heartbeats to offline
    #[serde(default = "default_heartbeat_scan_interval_ms")]
    pub heartbeat_scan_interval_ms: u64,
}

fn default_timeout_scan_interval_ms() -> u64 {
    5_000
}

fn default_pending_retry_interval_ms() -> u64 {
    2_000
}

fn default_heartbeat_scan_interval_ms() -> u64 {
    30_000
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            timeout_scan_interval_ms: default_timeout_scan_interval_ms(),
            pending_retry_interval_ms: default_pending_retry_interval_ms(),
            heartbeat_scan_interval_ms: default_heartbeat_scan_interval_ms(),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub substrate: SubstrateConfig,

    pub store: StoreConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub reaper: ReaperConfig,
}

impl EngineConfig {
    /// Load from a YAML file, expanding ${VAR} references from the
    /// environment.
    pub fn from_file(path: impl AsRef<Path>) -> AdeResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse from a YAML string, expanding ${VAR} references.
    pub fn from_yaml(content: &str) -> AdeResult<Self> {
        let expanded = expand_env_vars(content);
        let config: EngineConfig = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AdeResult<()> {
        if self.substrate.url.is_empty() {
            return Err(AdeError::Config("substrate.url is required".to_string()));
        }
        if self.store.url.is_empty() {
            return Err(AdeError::Config("store.url is required".to_string()));
        }
        Ok(())
    }
}

/// Replace `${VAR}` references with environment values. Unset variables
/// expand to the empty string with a warning.
pub fn expand_env_vars(content: &str) -> String {
    let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex");
    re.replace_all(content, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("config references unset environment variable {}", name);
                String::new()
            }
        }
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let yaml = r#"
substrate:
  url: redis://127.0.0.1:6379
store:
  url: postgres://localhost/ade
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.substrate.namespace, "ade");
        assert_eq!(config.reaper.timeout_scan_interval_ms, 5_000);
        assert_eq!(config.reaper.heartbeat_scan_interval_ms, 30_000);
        assert!(config.observability.exporter_endpoint.is_none());
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("ADE_TEST_SUBSTRATE_URL", "redis://substrate:6379");
        let yaml = r#"
substrate:
  url: ${ADE_TEST_SUBSTRATE_URL}
  namespace: staging
store:
  url: postgres://localhost/ade
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.substrate.url, "redis://substrate:6379");
        assert_eq!(config.substrate.namespace, "staging");
    }

    #[test]
    fn test_missing_url_rejected() {
        let yaml = r#"
substrate:
  url: ""
store:
  url: postgres://localhost/ade
"#;
        assert!(matches!(
            EngineConfig::from_yaml(yaml),
            Err(AdeError::Config(_))
        ));
    }
}
