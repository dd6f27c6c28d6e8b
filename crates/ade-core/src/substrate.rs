// ADE Core - Message substrate port
//
// Durable append-only per-channel streams with consumer groups, explicit
// acknowledgement, and replay. Adapters live in ade-substrate; this module
// only defines the contract.
//
// Acknowledgement discipline (hard rule): a message is acknowledged only
// after the subscribed handler returns without error. Bulk or pre-handler
// acknowledgement is forbidden.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::error::AdeResult;

/// Shared results channel consumed by the orchestrator
pub const RESULTS_CHANNEL: &str = "orchestrator:results";

/// Consumer group of the state-machine driver on the results channel
pub const RESULTS_GROUP: &str = "orchestrator-group";

/// Task channel for an agent type: `agent:<type>:tasks`
pub fn task_channel(agent_type: &str) -> String {
    format!("agent:{}:tasks", agent_type)
}

/// Consumer group for an agent type: `agent-<type>-group`
pub fn task_group(agent_type: &str) -> String {
    format!("agent-{}-group", agent_type)
}

/// Durable stream mirror of a channel: `stream:<channel>`
pub fn stream_mirror(channel: &str) -> String {
    format!("stream:{}", channel)
}

/// Options for a single publish
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Ordering key; messages sharing a key are delivered FIFO
    pub key: Option<String>,

    /// Mirror the message onto the channel's durable stream
    pub mirror_to_stream: bool,
}

impl PublishOptions {
    /// Keyed, stream-mirrored publish - the dispatcher's default shape.
    pub fn durable(key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            mirror_to_stream: true,
        }
    }
}

/// Options for a subscription
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// Named consumer group; exactly one member receives each message until
    /// it is acknowledged
    pub consumer_group: String,

    /// Consumer name, unique per instance (horizontal scaling safe)
    pub consumer_name: String,

    /// Replay the stream from the beginning instead of the tail. Group
    /// creation itself is always positioned at the tail; this flag exists
    /// for offline replay tooling only and defaults to false.
    pub from_beginning: bool,
}

impl SubscribeOptions {
    pub fn group(consumer_group: impl Into<String>, consumer_name: impl Into<String>) -> Self {
        Self {
            consumer_group: consumer_group.into(),
            consumer_name: consumer_name.into(),
            from_beginning: false,
        }
    }
}

/// Handler invoked per delivered message. The message arrives already
/// unwrapped from any transport framing; only the substrate adapter
/// performs unwrapping.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message. Returning Err leaves the message pending and
    /// redeliverable; returning Ok acknowledges it.
    async fn handle(&self, message: serde_json::Value) -> AdeResult<()>;
}

/// Adapter making a plain async closure usable as a handler.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = AdeResult<()>> + Send,
{
    async fn handle(&self, message: serde_json::Value) -> AdeResult<()> {
        (self.0)(message).await
    }
}

/// Handle on a running subscription loop
pub struct SubscriptionHandle {
    join: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn new(join: JoinHandle<()>) -> Self {
        Self { join }
    }

    /// Stop the subscription loop. In-flight unacked messages remain pending
    /// on the substrate and are redelivered to the next consumer.
    pub fn abort(&self) {
        self.join.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}

/// The substrate port. Implementations: in-memory fake (tests) and Redis
/// Streams (production), both in ade-substrate.
#[async_trait]
pub trait MessageSubstrate: Send + Sync {
    /// Publish a message to a channel. Returns the substrate-assigned
    /// message id. Fails with Transport on connection loss.
    async fn publish(
        &self,
        channel: &str,
        payload: serde_json::Value,
        options: PublishOptions,
    ) -> AdeResult<String>;

    /// Subscribe to a channel under a consumer group. Creates the group
    /// idempotently, positioned at the current tail. The returned handle
    /// owns the background delivery loop.
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
        options: SubscribeOptions,
    ) -> AdeResult<SubscriptionHandle>;
}

/// Shared substrate reference
pub type SubstrateRef = Arc<dyn MessageSubstrate>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(task_channel("ml-training"), "agent:ml-training:tasks");
        assert_eq!(task_group("ml-training"), "agent-ml-training-group");
        assert_eq!(
            stream_mirror("orchestrator:results"),
            "stream:orchestrator:results"
        );
    }

    #[test]
    fn test_publish_options_durable() {
        let options = PublishOptions::durable("wf-1");
        assert_eq!(options.key.as_deref(), Some("wf-1"));
        assert!(options.mirror_to_stream);

        let default = PublishOptions::default();
        assert!(default.key.is_none());
        assert!(!default.mirror_to_stream);
    }

    #[test]
    fn test_subscribe_options_default_tail() {
        let options = SubscribeOptions::group("orchestrator-group", "consumer-1");
        assert!(!options.from_beginning);
    }

    #[tokio::test]
    async fn test_fn_handler() {
        let handler = FnHandler(|message: serde_json::Value| async move {
            assert_eq!(message["x"], 1);
            Ok(())
        });
        handler.handle(serde_json::json!({"x": 1})).await.unwrap();
    }
}
