//! Compute shard actor
//!
//! Each shard owns one `StateStore` and drains a bounded FIFO queue on its own
//! task. Nothing else touches the store while the actor runs, so applying an
//! update needs no locking. The actor is a two-state machine:
//!
//! ```text
//! RUNNING --(Done)--> report state to the engine --> TERMINATED
//! RUNNING --(cancel / queue closed)-------------------> TERMINATED (no report)
//! ```

use super::engine::Coordinator;
use crate::config::QueueFullPolicy;
use crate::error::PipelineError;
use crate::ingest::UpdateRecord;
use crate::state::StateStore;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug)]
pub enum ShardMessage {
    Update(UpdateRecord),
    /// No further updates will arrive for this shard
    Done,
}

/// What a shard hands back once it has drained its queue
#[derive(Debug)]
pub struct ShardReport {
    pub shard_id: usize,
    pub state: StateStore,
    /// Update records dequeued and applied
    pub updates_applied: u64,
    /// Keys actually changed across all updates
    pub changes_applied: u64,
}

pub(crate) struct ShardActor {
    shard_id: usize,
    state: StateStore,
    rx: mpsc::Receiver<ShardMessage>,
    coordinator: Arc<Coordinator>,
    cancel: CancellationToken,
    updates_applied: u64,
    changes_applied: u64,
}

impl ShardActor {
    fn new(
        shard_id: usize,
        rx: mpsc::Receiver<ShardMessage>,
        coordinator: Arc<Coordinator>,
        cancel: CancellationToken,
    ) -> Self {
        ShardActor {
            shard_id,
            state: StateStore::new(),
            rx,
            coordinator,
            cancel,
            updates_applied: 0,
            changes_applied: 0,
        }
    }

    async fn run(mut self) {
        debug!(shard_id = self.shard_id, "shard started");

        loop {
            let msg = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    warn!(
                        shard_id = self.shard_id,
                        updates = self.updates_applied,
                        "shard cancelled before done signal, state discarded"
                    );
                    return;
                }
                msg = self.rx.recv() => msg,
            };

            match msg {
                Some(ShardMessage::Update(record)) => self.apply(record),
                Some(ShardMessage::Done) => break,
                None => {
                    warn!(
                        shard_id = self.shard_id,
                        "shard queue closed without done signal, state discarded"
                    );
                    return;
                }
            }
        }

        // Anything routed after the sentinel is a bug; fail the sender loudly
        self.rx.close();

        debug!(
            shard_id = self.shard_id,
            updates = self.updates_applied,
            changes = self.changes_applied,
            users = self.state.user_count(),
            "shard drained"
        );

        let coordinator = self.coordinator.clone();
        coordinator.report_shard_done(self.into_report());
    }

    #[inline]
    fn apply(&mut self, record: UpdateRecord) {
        let changes = self
            .state
            .apply(record.user, record.timestamp, record.fields);
        self.updates_applied = self.updates_applied.saturating_add(1);
        self.changes_applied = self.changes_applied.saturating_add(changes.len() as u64);
    }

    fn into_report(self) -> ShardReport {
        ShardReport {
            shard_id: self.shard_id,
            state: self.state,
            updates_applied: self.updates_applied,
            changes_applied: self.changes_applied,
        }
    }
}

#[derive(Clone)]
pub(crate) struct ShardHandle {
    tx: mpsc::Sender<ShardMessage>,
    shard_id: usize,
    capacity: usize,
    policy: QueueFullPolicy,
}

impl ShardHandle {
    /// Enqueue an update according to the queue-full policy
    #[inline]
    pub(crate) async fn send_update(&self, record: UpdateRecord) -> Result<(), PipelineError> {
        let msg = ShardMessage::Update(record);
        match self.policy {
            QueueFullPolicy::Block => self
                .tx
                .send(msg)
                .await
                .map_err(|_| PipelineError::QueueClosed {
                    shard_id: self.shard_id,
                }),
            QueueFullPolicy::Reject => self.tx.try_send(msg).map_err(|e| match e {
                TrySendError::Full(_) => PipelineError::Backpressure {
                    shard_id: self.shard_id,
                    capacity: self.capacity,
                },
                TrySendError::Closed(_) => PipelineError::QueueClosed {
                    shard_id: self.shard_id,
                },
            }),
        }
    }

    /// Enqueue the sentinel. Always waits for capacity, whatever the policy:
    /// a lost sentinel would stall the run.
    pub(crate) async fn send_done(&self) -> Result<(), PipelineError> {
        self.tx
            .send(ShardMessage::Done)
            .await
            .map_err(|_| PipelineError::QueueClosed {
                shard_id: self.shard_id,
            })
    }
}

/// Spawn one shard actor on the current Tokio runtime
pub(crate) fn spawn_shard(
    shard_id: usize,
    capacity: usize,
    policy: QueueFullPolicy,
    coordinator: Arc<Coordinator>,
    cancel: CancellationToken,
) -> (ShardHandle, JoinHandle<()>) {
    debug_assert!(capacity > 0, "Precondition: queue capacity must be positive");

    let (tx, rx) = mpsc::channel(capacity);
    let actor = ShardActor::new(shard_id, rx, coordinator, cancel);
    let task = tokio::spawn(actor.run());

    let handle = ShardHandle {
        tx,
        shard_id,
        capacity,
        policy,
    };
    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::sink::MemorySink;
    use std::collections::HashMap;
    use std::time::Duration;

    fn record(user: &str, ts: i64, key: &str, value: &str) -> UpdateRecord {
        let mut fields = HashMap::new();
        fields.insert(key.to_string(), value.to_string());
        UpdateRecord::new(user, ts, fields)
    }

    #[tokio::test]
    async fn test_shard_applies_until_done() {
        let sink = MemorySink::new();
        let (coordinator, completion) = Coordinator::new(1, 1, Arc::new(sink.clone()));
        let (handle, task) = spawn_shard(
            0,
            16,
            QueueFullPolicy::Block,
            Arc::new(coordinator),
            CancellationToken::new(),
        );

        handle.send_update(record("u1", 1, "k", "v1")).await.unwrap();
        handle.send_update(record("u1", 2, "k", "v2")).await.unwrap();
        handle.send_update(record("u1", 2, "k", "tie")).await.unwrap();
        handle.send_done().await.unwrap();
        task.await.unwrap();

        let report = completion.await.unwrap().unwrap();
        assert_eq!(report.updates_applied, 3);
        assert_eq!(report.changes_applied, 2);
        let snapshot = sink.last().unwrap();
        assert_eq!(snapshot["u1"]["k"], "v2");
    }

    #[tokio::test]
    async fn test_send_after_done_is_rejected() {
        let (coordinator, _completion) = Coordinator::new(1, 1, Arc::new(MemorySink::new()));
        let (handle, task) = spawn_shard(
            3,
            16,
            QueueFullPolicy::Block,
            Arc::new(coordinator),
            CancellationToken::new(),
        );

        handle.send_done().await.unwrap();
        task.await.unwrap();

        let err = handle.send_update(record("late", 1, "k", "v")).await.unwrap_err();
        assert!(matches!(err, PipelineError::QueueClosed { shard_id: 3 }));
    }

    #[tokio::test]
    async fn test_cancel_terminates_without_report() {
        let sink = MemorySink::new();
        let (coordinator, completion) = Coordinator::new(1, 1, Arc::new(sink.clone()));
        // Held here so the completion sender outlives the cancelled actor
        let coordinator = Arc::new(coordinator);
        let cancel = CancellationToken::new();
        let (handle, task) = spawn_shard(
            0,
            16,
            QueueFullPolicy::Block,
            coordinator.clone(),
            cancel.clone(),
        );

        handle.send_update(record("u1", 1, "k", "v")).await.unwrap();
        cancel.cancel();
        task.await.unwrap();

        // Still pending: the shard never reported
        assert!(tokio::time::timeout(Duration::from_millis(50), completion)
            .await
            .is_err());
        assert_eq!(sink.emit_count(), 0);
        drop(coordinator);
    }

    #[tokio::test]
    async fn test_closed_queue_terminates_without_report() {
        let sink = MemorySink::new();
        let (coordinator, _completion) = Coordinator::new(1, 1, Arc::new(sink.clone()));
        let (handle, task) = spawn_shard(
            0,
            4,
            QueueFullPolicy::Block,
            Arc::new(coordinator),
            CancellationToken::new(),
        );

        drop(handle);
        task.await.unwrap();
        assert_eq!(sink.emit_count(), 0);
    }

    #[tokio::test]
    async fn test_reject_policy_reports_backpressure() {
        // No actor draining the queue, so the second update finds it full
        let (tx, _rx) = mpsc::channel(1);
        let handle = ShardHandle {
            tx,
            shard_id: 5,
            capacity: 1,
            policy: QueueFullPolicy::Reject,
        };

        handle.send_update(record("u", 1, "k", "v")).await.unwrap();
        let err = handle.send_update(record("u", 2, "k", "v")).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Backpressure {
                shard_id: 5,
                capacity: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_block_policy_waits_for_capacity() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = ShardHandle {
            tx,
            shard_id: 0,
            capacity: 1,
            policy: QueueFullPolicy::Block,
        };

        handle.send_update(record("u", 1, "k", "a")).await.unwrap();

        let blocked = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.send_update(record("u", 2, "k", "b")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        assert!(matches!(rx.recv().await, Some(ShardMessage::Update(_))));
        blocked.await.unwrap().unwrap();
        assert!(matches!(rx.recv().await, Some(ShardMessage::Update(_))));
    }
}
