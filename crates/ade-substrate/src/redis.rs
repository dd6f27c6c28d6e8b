// RedisSubstrate - Redis Streams substrate adapter
//
// Channels map to streams under `<namespace>:<channel>`; the durable mirror
// adds `<namespace>:stream:<channel>`. Consumer groups are created with
// MKSTREAM positioned at `$` (the tail) so a new group never replays
// history, and reads use the `>` sentinel (new messages only). A message is
// XACKed only after the handler returns Ok; anything else stays in the
// pending entries list and is reclaimed after it goes stale.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tracing::{debug, error, warn};

use ade_core::{
    stream_mirror, AdeError, AdeResult, MessageHandler, MessageSubstrate, PublishOptions,
    SubscribeOptions, SubscriptionHandle,
};

use crate::framing::Frame;

/// Field under which the framed payload is stored in each stream entry
const PAYLOAD_FIELD: &str = "payload";

/// Block timeout for each XREADGROUP call
const READ_BLOCK_MS: usize = 5_000;

/// Batch size per read
const READ_COUNT: usize = 10;

/// Idle time after which another consumer may claim a pending entry
const RECLAIM_MIN_IDLE_MS: usize = 60_000;

/// Redis Streams substrate
#[derive(Clone)]
pub struct RedisSubstrate {
    manager: ConnectionManager,
    namespace: String,
}

impl RedisSubstrate {
    /// Connect to Redis. Fails with Transport if the server is unreachable;
    /// once connected, the connection manager recovers transient disconnects
    /// transparently.
    pub async fn connect(url: &str, namespace: impl Into<String>) -> AdeResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AdeError::Transport(format!("invalid redis url: {}", e)))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| AdeError::Transport(format!("redis connect: {}", e)))?;
        Ok(Self {
            manager,
            namespace: namespace.into(),
        })
    }

    fn key(&self, channel: &str) -> String {
        format!("{}:{}", self.namespace, channel)
    }

    async fn append(
        conn: &mut ConnectionManager,
        key: &str,
        payload: &str,
    ) -> AdeResult<String> {
        let id: String = conn
            .xadd(key, "*", &[(PAYLOAD_FIELD, payload)])
            .await
            .map_err(|e| AdeError::Transport(format!("xadd {}: {}", key, e)))?;
        Ok(id)
    }

    /// Create the consumer group at the tail, idempotently.
    async fn ensure_group(
        conn: &mut ConnectionManager,
        key: &str,
        group: &str,
        from_beginning: bool,
    ) -> AdeResult<()> {
        let start = if from_beginning { "0" } else { "$" };
        let created: Result<(), redis::RedisError> =
            conn.xgroup_create_mkstream(key, group, start).await;
        match created {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(AdeError::Transport(format!(
                "xgroup create {} {}: {}",
                key, group, e
            ))),
        }
    }

    /// Re-own entries another consumer claimed but never acknowledged.
    async fn reclaim_stale(
        conn: &mut ConnectionManager,
        key: &str,
        group: &str,
        consumer: &str,
    ) -> Vec<StreamId> {
        let pending: Result<redis::streams::StreamPendingCountReply, _> = conn
            .xpending_count(key, group, "-", "+", READ_COUNT)
            .await;
        let ids: Vec<String> = match pending {
            Ok(reply) => reply
                .ids
                .iter()
                .filter(|p| p.last_delivered_ms as usize >= RECLAIM_MIN_IDLE_MS)
                .map(|p| p.id.clone())
                .collect(),
            Err(e) => {
                warn!(key, group, "xpending failed: {}", e);
                return Vec::new();
            }
        };
        if ids.is_empty() {
            return Vec::new();
        }
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let claimed: Result<redis::streams::StreamClaimReply, _> = conn
            .xclaim(key, group, consumer, RECLAIM_MIN_IDLE_MS, &id_refs)
            .await;
        match claimed {
            Ok(reply) => reply.ids,
            Err(e) => {
                warn!(key, group, "xclaim failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn handle_entry(
        conn: &mut ConnectionManager,
        key: &str,
        group: &str,
        handler: &Arc<dyn MessageHandler>,
        entry: &StreamId,
    ) {
        let raw = match entry.map.get(PAYLOAD_FIELD) {
            Some(redis::Value::Data(bytes)) => bytes.clone(),
            _ => {
                // Unparseable entry shape; acknowledging would hide it, so
                // log and leave it pending for operator inspection.
                error!(key, id = %entry.id, "stream entry has no payload field");
                return;
            }
        };

        let value: serde_json::Value = match serde_json::from_slice(&raw) {
            Ok(v) => v,
            Err(e) => {
                error!(key, id = %entry.id, "stream entry is not JSON: {}", e);
                return;
            }
        };

        let (_, body) = Frame::unwrap_value(value);
        match handler.handle(body).await {
            Ok(()) => {
                let acked: Result<i64, _> = conn.xack(key, group, &[&entry.id]).await;
                if let Err(e) = acked {
                    warn!(key, id = %entry.id, "xack failed, message will redeliver: {}", e);
                }
            }
            Err(e) => {
                warn!(key, id = %entry.id, "handler failed, message stays pending: {}", e);
            }
        }
    }
}

#[async_trait]
impl MessageSubstrate for RedisSubstrate {
    async fn publish(
        &self,
        channel: &str,
        payload: serde_json::Value,
        options: PublishOptions,
    ) -> AdeResult<String> {
        let frame = Frame::wrap(channel, options.key.clone(), payload);
        let serialized = serde_json::to_string(&frame)?;

        let mut conn = self.manager.clone();
        Self::append(&mut conn, &self.key(channel), &serialized).await?;
        if options.mirror_to_stream {
            Self::append(&mut conn, &self.key(&stream_mirror(channel)), &serialized).await?;
        }

        debug!(channel, message_id = %frame.message_id, "published message");
        Ok(frame.message_id)
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
        options: SubscribeOptions,
    ) -> AdeResult<SubscriptionHandle> {
        let key = self.key(channel);
        let group = options.consumer_group.clone();
        let consumer = options.consumer_name.clone();

        let mut conn = self.manager.clone();
        Self::ensure_group(&mut conn, &key, &group, options.from_beginning).await?;

        let join = tokio::spawn(async move {
            let read_options = StreamReadOptions::default()
                .group(&group, &consumer)
                .block(READ_BLOCK_MS)
                .count(READ_COUNT);

            loop {
                // New messages only; never the from-the-beginning sentinel.
                let reply: Result<StreamReadReply, _> = conn
                    .xread_options(&[&key], &[">"], &read_options)
                    .await;

                match reply {
                    Ok(reply) => {
                        for stream in &reply.keys {
                            for entry in &stream.ids {
                                Self::handle_entry(&mut conn, &key, &group, &handler, entry)
                                    .await;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(key = %key, "xreadgroup failed, retrying: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }

                let stale = Self::reclaim_stale(&mut conn, &key, &group, &consumer).await;
                for entry in &stale {
                    Self::handle_entry(&mut conn, &key, &group, &handler, entry).await;
                }
            }
        });

        Ok(SubscriptionHandle::new(join))
    }
}
