// ADE Core - Error types
//
// One error enum for the whole engine. Variants map 1:1 onto the failure
// classes the orchestrator distinguishes when deciding whether to retry,
// reject, or terminate a workflow.

use thiserror::Error;

/// Result alias used throughout ADE
pub type AdeResult<T> = Result<T, AdeError>;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum AdeError {
    /// Substrate connect/publish failure. Fatal for the current operation;
    /// in-flight messages stay pending for redelivery.
    #[error("transport error: {0}")]
    Transport(String),

    /// Envelope or result failed schema validation. Never acknowledged.
    #[error("validation error: {0}")]
    Validation(String),

    /// Workflow definition references unknown agent types or has dangling
    /// routing targets. Rejected at creation time.
    #[error("invalid workflow definition: {0}")]
    DefinitionInvalid(String),

    /// Ingress surface is not bound (or not enabled) for the platform.
    #[error("surface not bound: {0}")]
    SurfaceNotBound(String),

    /// Referenced platform does not exist.
    #[error("platform not found: {0}")]
    PlatformNotFound(String),

    /// No online agent of the required type at dispatch time. Terminal for
    /// the workflow.
    #[error("agent unavailable: {0}")]
    AgentUnavailable(String),

    /// Task exceeded its envelope timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Optimistic-concurrency version mismatch. Caller retries on a fresh
    /// read.
    #[error("version conflict: {0}")]
    Conflict(String),

    /// Record not found where one was required.
    #[error("not found: {0}")]
    NotFound(String),

    /// Broken internal invariant (builder self-check, impossible state).
    /// Terminal for the workflow with a diagnostic.
    #[error("internal error: {0}")]
    Internal(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdeError {
    /// Whether the state machine should treat this error as retryable
    /// (as opposed to terminal for the workflow).
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdeError::Transport(_) | AdeError::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AdeError::SurfaceNotBound("platform p1 has no REST surface".to_string());
        assert_eq!(
            err.to_string(),
            "surface not bound: platform p1 has no REST surface"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AdeError::Transport("connection reset".into()).is_retryable());
        assert!(AdeError::Conflict("version 3 != 4".into()).is_retryable());
        assert!(!AdeError::AgentUnavailable("scaffold".into()).is_retryable());
        assert!(!AdeError::Validation("bad envelope".into()).is_retryable());
    }

    #[test]
    fn test_from_serde_json() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: AdeError = parse_err.into();
        assert!(matches!(err, AdeError::Serialization(_)));
    }
}
