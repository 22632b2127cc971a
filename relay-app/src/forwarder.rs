//! Bounded forwarding queue with a single on-demand drain task.
//!
//! The queue and the processing flag share one mutex: enqueue pushes and
//! decides whether to spawn a drain in the same critical section where the
//! drain decides the queue is empty and clears the flag. An item therefore
//! can never land in the queue after the drain has looked for the last time.

use crate::delivery::{self, DeliveryMode};
use crate::store::ConfigStore;
use relay_channels::{Destination, InboundMessage, PlatformClient};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("queue full ({capacity} items pending)")]
    QueueFull { capacity: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwarderStatus {
    pub queue_len: usize,
    pub capacity: usize,
    pub success: u64,
    pub failure: u64,
    pub processing: bool,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<InboundMessage>,
    processing: bool,
}

pub struct Forwarder {
    client: Arc<dyn PlatformClient>,
    store: ConfigStore,
    capacity: usize,
    delivery_delay: Duration,
    state: Mutex<QueueState>,
    success: AtomicU64,
    failure: AtomicU64,
}

impl Forwarder {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        store: ConfigStore,
        capacity: usize,
        delivery_delay: Duration,
    ) -> Self {
        Self {
            client,
            store,
            capacity,
            delivery_delay,
            state: Mutex::new(QueueState::default()),
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn client(&self) -> &Arc<dyn PlatformClient> {
        &self.client
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        // The guarded section never panics mid-update, so a poisoned lock
        // still holds consistent data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `item` for delivery and start a drain if none is running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(self: &Arc<Self>, item: InboundMessage) -> Result<(), EnqueueError> {
        let start_drain = {
            let mut state = self.lock_state();
            if state.items.len() >= self.capacity {
                return Err(EnqueueError::QueueFull {
                    capacity: self.capacity,
                });
            }
            state.items.push_back(item);
            !std::mem::replace(&mut state.processing, true)
        };

        if start_drain {
            let forwarder = Arc::clone(self);
            tokio::spawn(async move {
                forwarder.drain().await;
            });
        }
        Ok(())
    }

    pub fn status(&self) -> ForwarderStatus {
        let (queue_len, processing) = {
            let state = self.lock_state();
            (state.items.len(), state.processing)
        };
        ForwarderStatus {
            queue_len,
            capacity: self.capacity,
            success: self.success.load(Ordering::Relaxed),
            failure: self.failure.load(Ordering::Relaxed),
            processing,
        }
    }

    fn next_item(&self) -> Option<InboundMessage> {
        let mut state = self.lock_state();
        let item = state.items.pop_front();
        if item.is_none() {
            state.processing = false;
        }
        item
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn drain(&self) {
        tracing::debug!("drain started");
        let mut delivered: u64 = 0;
        while let Some(item) = self.next_item() {
            self.process(item).await;
            delivered += 1;
            tokio::time::sleep(self.delivery_delay).await;
        }
        tracing::debug!(items = delivered, "drain finished; queue empty");
    }

    async fn process(&self, item: InboundMessage) {
        let chat_id = item.chat_id;
        let message_id = item.message_id;
        let kind = item.payload.kind();
        let queued_ms = item.age().num_milliseconds();

        let (destination, mode) = match self.resolve_target().await {
            Ok(target) => target,
            Err(error) => {
                self.failure.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%error, %chat_id, %message_id, kind, "dropping message");
                return;
            }
        };

        match delivery::deliver(self.client.as_ref(), item, &destination, mode).await {
            Ok(path) => {
                self.success.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    %chat_id,
                    %message_id,
                    kind,
                    %destination,
                    ?path,
                    queued_ms,
                    "message delivered"
                );
            }
            Err(error) => {
                self.failure.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    %error,
                    %chat_id,
                    %message_id,
                    kind,
                    %destination,
                    "message delivery failed"
                );
            }
        }
    }

    // Read per item so target changes apply from the next message on.
    async fn resolve_target(&self) -> anyhow::Result<(Destination, DeliveryMode)> {
        let record = self.store.load().await?;
        let destination = record
            .destination()
            .ok_or_else(|| anyhow::anyhow!("no target chat set"))?;
        Ok((destination, DeliveryMode::from_always_dl(record.always_dl)))
    }
}

#[cfg(test)]
mod tests {
    use super::{EnqueueError, Forwarder, ForwarderStatus};
    use crate::store::{ConfigStore, ForwardingRecord};
    use crate::testing::{Call, RecordingClient, inbound};
    use relay_channels::{Media, Payload};
    use std::sync::Arc;
    use std::time::Duration;

    struct Harness {
        forwarder: Arc<Forwarder>,
        client: Arc<RecordingClient>,
        _dir: tempfile::TempDir,
    }

    async fn harness(client: RecordingClient, capacity: usize, always_dl: bool) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::new(dir.path().join("config.json"));
        store
            .save(&ForwardingRecord {
                target_chat_id: Some(-500),
                target_thread_id: Some(3),
                always_dl,
            })
            .await
            .expect("save record");

        let client = Arc::new(client);
        let forwarder = Arc::new(Forwarder::new(
            client.clone(),
            store,
            capacity,
            Duration::from_millis(1),
        ));
        Harness {
            forwarder,
            client,
            _dir: dir,
        }
    }

    fn text(id: i64) -> Payload {
        Payload::Text {
            text: format!("m{id}"),
        }
    }

    async fn wait_idle(forwarder: &Forwarder) -> ForwarderStatus {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let status = forwarder.status();
                if !status.processing && status.queue_len == 0 {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("forwarder drained in time")
    }

    #[tokio::test]
    async fn delivers_in_arrival_order() {
        let h = harness(RecordingClient::default(), 100, false).await;
        for id in 0..20 {
            h.forwarder.enqueue(inbound(id, text(id))).expect("accepted");
        }

        let status = wait_idle(&h.forwarder).await;
        assert_eq!(status.success, 20);
        assert_eq!(status.failure, 0);

        let order: Vec<i64> = h
            .client
            .calls()
            .into_iter()
            .map(|call| match call {
                Call::Forward { message_id, .. } => message_id,
                other => panic!("unexpected call {other:?}"),
            })
            .collect();
        assert_eq!(order, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn rejects_when_full_without_growing() {
        let h = harness(RecordingClient::default(), 3, false).await;
        // Current-thread runtime: the drain cannot run until this task yields.
        for id in 0..3 {
            h.forwarder.enqueue(inbound(id, text(id))).expect("accepted");
        }
        assert_eq!(h.forwarder.status().queue_len, 3);

        let err = h
            .forwarder
            .enqueue(inbound(99, text(99)))
            .expect_err("queue is full");
        assert_eq!(err, EnqueueError::QueueFull { capacity: 3 });
        assert_eq!(h.forwarder.status().queue_len, 3);

        let status = wait_idle(&h.forwarder).await;
        assert_eq!(status.success, 3);
        assert!(
            !h.client
                .calls()
                .iter()
                .any(|call| matches!(call, Call::Forward { message_id: 99, .. }))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_enqueuers_never_overlap_deliveries() {
        let h = harness(
            RecordingClient::default().with_call_delay(Duration::from_millis(2)),
            500,
            false,
        )
        .await;

        let mut tasks = Vec::new();
        for producer in 0..8_i64 {
            let forwarder = h.forwarder.clone();
            tasks.push(tokio::spawn(async move {
                for n in 0..5_i64 {
                    let id = producer * 100 + n;
                    forwarder.enqueue(inbound(id, text(id))).expect("accepted");
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.expect("producer finished");
        }

        let status = wait_idle(&h.forwarder).await;
        assert_eq!(status.success, 40);
        assert_eq!(h.client.calls().len(), 40);
        assert_eq!(h.client.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn always_reupload_skips_forward() {
        let h = harness(RecordingClient::default(), 10, true).await;
        h.forwarder
            .enqueue(inbound(1, Payload::Text { text: "hey".into() }))
            .expect("accepted");

        let status = wait_idle(&h.forwarder).await;
        assert_eq!(status.success, 1);
        let calls = h.client.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(&calls[0], Call::Send { kind: "text", .. }));
    }

    #[tokio::test]
    async fn forward_failure_with_successful_fallback_counts_as_success() {
        let h = harness(RecordingClient::failing_forward(), 10, false).await;
        h.forwarder
            .enqueue(inbound(1, Payload::Photo(Media::new("ph", None))))
            .expect("accepted");

        let status = wait_idle(&h.forwarder).await;
        assert_eq!(status.success, 1);
        assert_eq!(status.failure, 0);

        let sends: Vec<_> = h
            .client
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::Send { kind: "photo", .. }))
            .collect();
        assert_eq!(sends.len(), 1);
    }

    #[tokio::test]
    async fn unsupported_content_counts_failure_and_keeps_draining() {
        let h = harness(RecordingClient::default(), 10, false).await;
        h.forwarder
            .enqueue(inbound(
                1,
                Payload::Unknown {
                    fields: vec!["dice".into()],
                },
            ))
            .expect("accepted");
        h.forwarder.enqueue(inbound(2, text(2))).expect("accepted");

        let status = wait_idle(&h.forwarder).await;
        assert_eq!(status.failure, 1);
        assert_eq!(status.success, 1);
        let calls = h.client.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(calls[0], Call::Forward { message_id: 2, .. }));
    }

    #[tokio::test]
    async fn platform_failures_are_counted_not_retried() {
        let h = harness(
            RecordingClient::failing_forward().with_failing_sends(),
            10,
            false,
        )
        .await;
        h.forwarder.enqueue(inbound(1, text(1))).expect("accepted");
        h.forwarder.enqueue(inbound(2, text(2))).expect("accepted");

        let status = wait_idle(&h.forwarder).await;
        assert_eq!(status.failure, 2);
        assert_eq!(status.success, 0);
        // One forward attempt and one fallback per item.
        assert_eq!(h.client.calls().len(), 4);
    }

    #[tokio::test]
    async fn restarts_drain_after_going_idle() {
        let h = harness(RecordingClient::default(), 10, false).await;
        h.forwarder.enqueue(inbound(1, text(1))).expect("accepted");
        let first = wait_idle(&h.forwarder).await;
        assert!(!first.processing);
        assert_eq!(first.success, 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        h.forwarder.enqueue(inbound(2, text(2))).expect("accepted");
        let second = wait_idle(&h.forwarder).await;
        assert_eq!(second.success, 2);
        assert_eq!(h.client.calls().len(), 2);
    }

    #[tokio::test]
    async fn counters_never_decrease_during_a_run() {
        let h = harness(
            RecordingClient::failing_forward().with_call_delay(Duration::from_millis(1)),
            50,
            false,
        )
        .await;
        for id in 0..10 {
            let payload = if id % 3 == 0 {
                Payload::Unknown { fields: vec![] }
            } else {
                text(id)
            };
            h.forwarder.enqueue(inbound(id, payload)).expect("accepted");
        }

        let mut last = h.forwarder.status();
        loop {
            tokio::time::sleep(Duration::from_millis(1)).await;
            let now = h.forwarder.status();
            assert!(now.success >= last.success);
            assert!(now.failure >= last.failure);
            last = now;
            if !now.processing {
                break;
            }
        }
        assert_eq!(last.success + last.failure, 10);
        assert_eq!(last.failure, 4);
    }

    #[tokio::test]
    async fn missing_destination_at_delivery_is_a_failure() {
        let h = harness(RecordingClient::default(), 10, false).await;
        h.forwarder
            .store()
            .save(&ForwardingRecord::default())
            .await
            .expect("clear record");
        h.forwarder.enqueue(inbound(1, text(1))).expect("accepted");

        let status = wait_idle(&h.forwarder).await;
        assert_eq!(status.failure, 1);
        assert!(h.client.calls().is_empty());
    }

    #[tokio::test]
    async fn unreadable_state_at_delivery_is_a_failure() {
        let h = harness(RecordingClient::default(), 10, false).await;
        std::fs::write(h.forwarder.store().path(), "{ not json").expect("corrupt state");
        h.forwarder.enqueue(inbound(1, text(1))).expect("accepted");

        let status = wait_idle(&h.forwarder).await;
        assert_eq!(status.failure, 1);
        assert_eq!(status.success, 0);
        assert!(h.client.calls().is_empty());
    }

    #[tokio::test]
    async fn destination_change_applies_to_next_item() {
        let h = harness(RecordingClient::default(), 10, true).await;
        h.forwarder.enqueue(inbound(1, text(1))).expect("accepted");
        wait_idle(&h.forwarder).await;

        h.forwarder
            .store()
            .save(&ForwardingRecord {
                target_chat_id: Some(-900),
                target_thread_id: None,
                always_dl: true,
            })
            .await
            .expect("retarget");
        h.forwarder.enqueue(inbound(2, text(2))).expect("accepted");
        wait_idle(&h.forwarder).await;

        let targets: Vec<i64> = h
            .client
            .calls()
            .into_iter()
            .map(|call| match call {
                Call::Send { to, .. } => to.chat.get(),
                other => panic!("unexpected call {other:?}"),
            })
            .collect();
        assert_eq!(targets, vec![-500, -900]);
    }
}
