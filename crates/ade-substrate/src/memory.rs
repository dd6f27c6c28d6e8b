// InMemorySubstrate - process-local substrate adapter
//
// Preserves the full substrate contract without a broker: consumer groups
// with exactly-one-consumer-per-message delivery, acknowledgement only after
// the handler returns Ok, redelivery of unacked messages, and tail
// positioning for newly created groups. Used by tests and single-process
// deployments.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use ade_core::{
    stream_mirror, AdeResult, MessageHandler, MessageSubstrate, PublishOptions, SubscribeOptions,
    SubscriptionHandle,
};

use crate::framing::Frame;

/// Delay before a nacked message becomes claimable again
const REDELIVERY_DELAY: Duration = Duration::from_millis(20);

/// Idle poll fallback when no publish notification arrives
const IDLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct PendingEntry {
    offset: usize,
    in_flight: bool,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Log position of the next never-delivered message
    next_offset: usize,
    /// Delivered-but-unacked entries awaiting ack or redelivery
    pending: Vec<PendingEntry>,
}

#[derive(Default)]
struct ChannelInner {
    log: Vec<serde_json::Value>,
    groups: HashMap<String, GroupState>,
}

struct ChannelState {
    inner: Mutex<ChannelInner>,
    notify: Notify,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            inner: Mutex::new(ChannelInner::default()),
            notify: Notify::new(),
        }
    }
}

/// In-memory message substrate
#[derive(Default)]
pub struct InMemorySubstrate {
    channels: DashMap<String, Arc<ChannelState>>,
    streams: DashMap<String, Mutex<Vec<serde_json::Value>>>,
}

impl InMemorySubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, name: &str) -> Arc<ChannelState> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ChannelState::new()))
            .clone()
    }

    /// Number of entries mirrored onto a durable stream. Test observability.
    pub fn stream_len(&self, stream: &str) -> usize {
        self.streams.get(stream).map(|s| s.lock().len()).unwrap_or(0)
    }

    /// All entries mirrored onto a durable stream.
    pub fn stream_entries(&self, stream: &str) -> Vec<serde_json::Value> {
        self.streams
            .get(stream)
            .map(|s| s.lock().clone())
            .unwrap_or_default()
    }

    /// Total messages appended to a channel.
    pub fn channel_len(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|c| c.inner.lock().log.len())
            .unwrap_or(0)
    }

    /// Unacked messages of a consumer group. Test observability.
    pub fn pending_count(&self, channel: &str, group: &str) -> usize {
        self.channels
            .get(channel)
            .and_then(|c| c.inner.lock().groups.get(group).map(|g| g.pending.len()))
            .unwrap_or(0)
    }

    /// Create the group if absent, positioned at the current tail, and make
    /// any stranded in-flight entries claimable again (crash recovery).
    fn ensure_group(state: &ChannelState, group: &str, from_beginning: bool) {
        let mut inner = state.inner.lock();
        let tail = inner.log.len();
        let entry = inner
            .groups
            .entry(group.to_string())
            .or_insert_with(|| GroupState {
                next_offset: if from_beginning { 0 } else { tail },
                pending: Vec::new(),
            });
        for pending in entry.pending.iter_mut() {
            pending.in_flight = false;
        }
    }

    /// Claim the next deliverable message for a group, marking it in-flight.
    fn claim(state: &ChannelState, group: &str) -> Option<(usize, serde_json::Value)> {
        let mut inner = state.inner.lock();
        let ChannelInner { log, groups } = &mut *inner;
        let group_state = groups.get_mut(group)?;

        if let Some(entry) = group_state.pending.iter_mut().find(|e| !e.in_flight) {
            entry.in_flight = true;
            entry.delivery_count += 1;
            let offset = entry.offset;
            debug!(group, offset, delivery_count = entry.delivery_count, "redelivering message");
            return Some((offset, log[offset].clone()));
        }

        if group_state.next_offset < log.len() {
            let offset = group_state.next_offset;
            group_state.next_offset += 1;
            group_state.pending.push(PendingEntry {
                offset,
                in_flight: true,
                delivery_count: 1,
            });
            return Some((offset, log[offset].clone()));
        }

        None
    }

    fn ack(state: &ChannelState, group: &str, offset: usize) {
        let mut inner = state.inner.lock();
        if let Some(group_state) = inner.groups.get_mut(group) {
            group_state.pending.retain(|e| e.offset != offset);
        }
    }

    fn nack(state: &ChannelState, group: &str, offset: usize) {
        let mut inner = state.inner.lock();
        if let Some(group_state) = inner.groups.get_mut(group) {
            // Rotate the failed entry to the back so one poison message
            // cannot starve the rest of the backlog.
            if let Some(pos) = group_state.pending.iter().position(|e| e.offset == offset) {
                let mut entry = group_state.pending.remove(pos);
                entry.in_flight = false;
                group_state.pending.push(entry);
            }
        }
    }
}

#[async_trait]
impl MessageSubstrate for InMemorySubstrate {
    async fn publish(
        &self,
        channel: &str,
        payload: serde_json::Value,
        options: PublishOptions,
    ) -> AdeResult<String> {
        let frame = Frame::wrap(channel, options.key.clone(), payload);
        let message_id = frame.message_id.clone();
        let framed = serde_json::to_value(&frame)?;

        let state = self.channel(channel);
        {
            let mut inner = state.inner.lock();
            inner.log.push(framed.clone());
        }
        state.notify.notify_waiters();

        if options.mirror_to_stream {
            self.streams
                .entry(stream_mirror(channel))
                .or_insert_with(|| Mutex::new(Vec::new()))
                .lock()
                .push(framed);
        }

        debug!(channel, message_id = %message_id, "published message");
        Ok(message_id)
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
        options: SubscribeOptions,
    ) -> AdeResult<SubscriptionHandle> {
        let state = self.channel(channel);
        Self::ensure_group(&state, &options.consumer_group, options.from_beginning);

        let group = options.consumer_group.clone();
        let consumer = options.consumer_name.clone();
        let channel_name = channel.to_string();

        let join = tokio::spawn(async move {
            loop {
                match Self::claim(&state, &group) {
                    Some((offset, framed)) => {
                        let (_, body) = Frame::unwrap_value(framed);
                        match handler.handle(body).await {
                            Ok(()) => Self::ack(&state, &group, offset),
                            Err(e) => {
                                warn!(
                                    channel = %channel_name,
                                    group = %group,
                                    consumer = %consumer,
                                    offset,
                                    "handler failed, message stays pending: {}",
                                    e
                                );
                                Self::nack(&state, &group, offset);
                                tokio::time::sleep(REDELIVERY_DELAY).await;
                            }
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = state.notify.notified() => {}
                            _ = tokio::time::sleep(IDLE_POLL) => {}
                        }
                    }
                }
            }
        });

        Ok(SubscriptionHandle::new(join))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ade_core::{task_channel, FnHandler};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn wait_until(condition: impl Fn() -> bool) -> impl std::future::Future<Output = bool> {
        async move {
            for _ in 0..200 {
                if condition() {
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            condition()
        }
    }

    #[tokio::test]
    async fn test_publish_and_consume() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let received = Arc::new(AtomicUsize::new(0));

        let counter = received.clone();
        let _sub = substrate
            .subscribe(
                &task_channel("scaffold"),
                Arc::new(FnHandler(move |_| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })),
                SubscribeOptions::group("agent-scaffold-group", "c1"),
            )
            .await
            .unwrap();

        substrate
            .publish(
                &task_channel("scaffold"),
                serde_json::json!({"task_id": "t1"}),
                PublishOptions::durable("wf-1"),
            )
            .await
            .unwrap();

        assert!(wait_until(move || received.load(Ordering::SeqCst) == 1).await);
    }

    #[tokio::test]
    async fn test_mirror_to_stream() {
        let substrate = InMemorySubstrate::new();
        let channel = task_channel("scaffold");

        substrate
            .publish(&channel, serde_json::json!({"n": 1}), PublishOptions::durable("k"))
            .await
            .unwrap();
        substrate
            .publish(&channel, serde_json::json!({"n": 2}), PublishOptions::default())
            .await
            .unwrap();

        // Only the mirrored publish lands on the stream.
        assert_eq!(substrate.stream_len(&stream_mirror(&channel)), 1);
        assert_eq!(substrate.channel_len(&channel), 2);
    }

    #[tokio::test]
    async fn test_new_group_starts_at_tail() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let channel = task_channel("scaffold");

        // Two messages before any group exists.
        for n in 0..2 {
            substrate
                .publish(&channel, serde_json::json!({"n": n}), PublishOptions::default())
                .await
                .unwrap();
        }

        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        let _sub = substrate
            .subscribe(
                &channel,
                Arc::new(FnHandler(move |_| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })),
                SubscribeOptions::group("late-group", "c1"),
            )
            .await
            .unwrap();

        // Historical messages must not be replayed to the new group.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(received.load(Ordering::SeqCst), 0);

        substrate
            .publish(&channel, serde_json::json!({"n": 2}), PublishOptions::default())
            .await
            .unwrap();
        let counter = received.clone();
        assert!(wait_until(move || counter.load(Ordering::SeqCst) == 1).await);
    }

    #[tokio::test]
    async fn test_handler_error_leaves_message_pending() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let channel = task_channel("validator");
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        let _sub = substrate
            .subscribe(
                &channel,
                Arc::new(FnHandler(move |_| {
                    let counter = counter.clone();
                    async move {
                        // Fail the first two deliveries, succeed on the third.
                        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(ade_core::AdeError::Validation("not yet".into()))
                        } else {
                            Ok(())
                        }
                    }
                })),
                SubscribeOptions::group("agent-validator-group", "c1"),
            )
            .await
            .unwrap();

        substrate
            .publish(&channel, serde_json::json!({"task_id": "t1"}), PublishOptions::default())
            .await
            .unwrap();

        let counter = attempts.clone();
        assert!(wait_until(move || counter.load(Ordering::SeqCst) >= 3).await);

        // Eventually acked: nothing pending.
        let substrate2 = substrate.clone();
        let channel2 = channel.clone();
        assert!(
            wait_until(move || substrate2.pending_count(&channel2, "agent-validator-group") == 0)
                .await
        );
    }

    #[tokio::test]
    async fn test_crash_before_ack_redelivers_to_next_consumer() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let channel = task_channel("scaffold");
        let group = "agent-scaffold-group";

        // First consumer claims the message and "crashes" mid-handler: the
        // handler never returns, and the subscription is aborted.
        let started = Arc::new(AtomicUsize::new(0));
        let started_probe = started.clone();
        let sub = substrate
            .subscribe(
                &channel,
                Arc::new(FnHandler(move |_| {
                    let started = started_probe.clone();
                    async move {
                        started.fetch_add(1, Ordering::SeqCst);
                        // Simulate a hung handler until the task is aborted.
                        std::future::pending::<()>().await;
                        Ok(())
                    }
                })),
                SubscribeOptions::group(group, "doomed"),
            )
            .await
            .unwrap();

        substrate
            .publish(&channel, serde_json::json!({"task_id": "t1"}), PublishOptions::default())
            .await
            .unwrap();

        let probe = started.clone();
        assert!(wait_until(move || probe.load(Ordering::SeqCst) == 1).await);
        sub.abort();
        assert_eq!(substrate.pending_count(&channel, group), 1);

        // Restarted consumer in the same group receives the same message.
        let redelivered = Arc::new(AtomicUsize::new(0));
        let counter = redelivered.clone();
        let _sub2 = substrate
            .subscribe(
                &channel,
                Arc::new(FnHandler(move |_| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })),
                SubscribeOptions::group(group, "survivor"),
            )
            .await
            .unwrap();

        assert!(wait_until(move || redelivered.load(Ordering::SeqCst) == 1).await);
        let substrate_probe = substrate.clone();
        let channel_probe = channel.clone();
        assert!(
            wait_until(move || substrate_probe.pending_count(&channel_probe, group) == 0).await
        );
    }

    #[tokio::test]
    async fn test_consumer_group_fan_out_is_exactly_one() {
        let substrate = Arc::new(InMemorySubstrate::new());
        let channel = task_channel("scaffold");
        let group = "agent-scaffold-group";
        let total = Arc::new(AtomicUsize::new(0));

        // Keep the handles alive for the whole test; dropping one aborts its
        // delivery loop.
        let mut subscriptions = Vec::new();
        for name in ["c1", "c2", "c3"] {
            let counter = total.clone();
            let handle = substrate
                .subscribe(
                    &channel,
                    Arc::new(FnHandler(move |_| {
                        let counter = counter.clone();
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    })),
                    SubscribeOptions::group(group, name),
                )
                .await
                .unwrap();
            subscriptions.push(handle);
        }

        for n in 0..10 {
            substrate
                .publish(&channel, serde_json::json!({"n": n}), PublishOptions::default())
                .await
                .unwrap();
        }

        let probe = total.clone();
        assert!(wait_until(move || probe.load(Ordering::SeqCst) == 10).await);
        // Settle: no duplicate deliveries afterwards.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(total.load(Ordering::SeqCst), 10);
    }
}
