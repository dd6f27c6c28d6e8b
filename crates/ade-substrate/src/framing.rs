// Frame - transport wrapper around application messages
//
// Publishers wrap the application body in a metadata-bearing frame; the
// subscribe loop unwraps it before invoking the handler. No component other
// than the substrate adapters performs unwrapping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transport frame carried on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Substrate-assigned message id
    pub message_id: String,

    /// Channel the frame was published to
    pub channel: String,

    /// Ordering key, if the publisher supplied one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Publish timestamp
    pub published_at: DateTime<Utc>,

    /// The application message
    pub body: serde_json::Value,
}

impl Frame {
    /// Wrap an application body for publication.
    pub fn wrap(channel: &str, key: Option<String>, body: serde_json::Value) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            channel: channel.to_string(),
            key,
            published_at: Utc::now(),
            body,
        }
    }

    /// Unwrap a wire value into (message_id, body). Values that are not
    /// frames (raw bodies from foreign publishers) pass through unchanged
    /// with no message id.
    pub fn unwrap_value(value: serde_json::Value) -> (Option<String>, serde_json::Value) {
        match serde_json::from_value::<Frame>(value.clone()) {
            Ok(frame) => (Some(frame.message_id), frame.body),
            Err(_) => (None, value),
        }
    }
}
