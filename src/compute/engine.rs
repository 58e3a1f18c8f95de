//! Compute Engine - routing, termination barrier and final merge
//!
//! ## Architecture
//!
//! ```text
//! Ingestor 1 ──┐                    ┌──► Shard 0 ──┐
//! Ingestor 2 ──┤── route_update ────┼──► Shard 1 ──┤── report_shard_done ──► merge ──► sink
//! Ingestor N ──┘  hash(user) mod M  └──► Shard M ──┘
//! ```
//!
//! ## Termination
//!
//! Two counted barriers, both guarded by one mutex:
//!
//! 1. Every ingestor calls `report_parsing_done` after its last `route_update`
//!    returned. The call that brings the count to `N` pushes one `Done` into
//!    every shard queue. Queues are FIFO, so `Done` is the last item each shard
//!    sees.
//! 2. Every shard reports its state after dequeuing `Done`. The report that
//!    brings the count to `M` takes the merged state out of the lock and emits
//!    it. Only one caller can observe that count, so emission happens once.
//!
//! A cancelled shard never reports, so the second count stays below `M` and
//! `wait_for_completion` ends in a timeout.

use super::shard_actor::{spawn_shard, ShardHandle, ShardReport};
use super::sink::StateSink;
use crate::config::PipelineConfig;
use crate::error::{Phase, PipelineError};
use crate::ingest::UpdateRecord;
use crate::state::StateStore;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Summary of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionReport {
    pub users: usize,
    pub keys: usize,
    pub shards: usize,
    pub updates_applied: u64,
    pub changes_applied: u64,
}

type Completion = Result<CompletionReport, PipelineError>;

/// Shard owning `user` among `shard_count` shards.
///
/// `DefaultHasher::new()` uses fixed keys, so the mapping is stable for the
/// whole process. It is not promised to survive a Rust upgrade, which does not
/// matter: shard ownership only lives as long as one run.
#[inline]
pub fn shard_index(user: &str, shard_count: usize) -> usize {
    debug_assert!(shard_count > 0, "Precondition: at least one shard");
    let mut hasher = DefaultHasher::new();
    user.hash(&mut hasher);
    let idx = (hasher.finish() % shard_count as u64) as usize;
    debug_assert!(idx < shard_count, "Hash produced invalid shard index");
    idx
}

struct Coordination {
    parsing_done: usize,
    shards_done: usize,
    global: StateStore,
    updates_applied: u64,
    changes_applied: u64,
    failure: Option<PipelineError>,
    completion_tx: Option<oneshot::Sender<Completion>>,
}

/// The engine's coordination state: both barrier counters and the global
/// accumulator. Shards hold it to report their state.
pub(crate) struct Coordinator {
    expected_ingestors: usize,
    shard_count: usize,
    sink: Arc<dyn StateSink>,
    inner: Mutex<Coordination>,
}

impl Coordinator {
    pub(crate) fn new(
        expected_ingestors: usize,
        shard_count: usize,
        sink: Arc<dyn StateSink>,
    ) -> (Self, oneshot::Receiver<Completion>) {
        let (completion_tx, completion_rx) = oneshot::channel();
        let coordinator = Coordinator {
            expected_ingestors,
            shard_count,
            sink,
            inner: Mutex::new(Coordination {
                parsing_done: 0,
                shards_done: 0,
                global: StateStore::new(),
                updates_applied: 0,
                changes_applied: 0,
                failure: None,
                completion_tx: Some(completion_tx),
            }),
        };
        (coordinator, completion_rx)
    }

    /// Count one finished ingestor. Returns true for exactly one call: the one
    /// that completes the parsing barrier.
    fn record_parsing_done(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.parsing_done >= self.expected_ingestors {
            warn!(
                expected = self.expected_ingestors,
                "parsing done reported more times than there are ingestors, ignoring"
            );
            return false;
        }
        inner.parsing_done += 1;
        debug!(
            done = inner.parsing_done,
            expected = self.expected_ingestors,
            "ingestor finished"
        );
        inner.parsing_done == self.expected_ingestors
    }

    pub(crate) fn report_shard_done(&self, report: ShardReport) {
        let finished = {
            let mut inner = self.inner.lock();
            debug_assert!(
                inner.shards_done < self.shard_count,
                "Precondition: shard {} reported after all shards were done",
                report.shard_id
            );

            inner.shards_done += 1;
            inner.updates_applied = inner.updates_applied.saturating_add(report.updates_applied);
            inner.changes_applied = inner.changes_applied.saturating_add(report.changes_applied);

            if inner.failure.is_none() {
                if let Err(e) = report.state.merge_into(&mut inner.global) {
                    error!(shard_id = report.shard_id, "{}", e);
                    inner.failure = Some(e.into());
                }
            }

            if inner.shards_done == self.shard_count {
                let completion_tx = inner.completion_tx.take();
                let global = std::mem::take(&mut inner.global);
                let failure = inner.failure.take();
                Some((
                    completion_tx,
                    global,
                    failure,
                    inner.updates_applied,
                    inner.changes_applied,
                ))
            } else {
                None
            }
        };

        if let Some((completion_tx, global, failure, updates_applied, changes_applied)) = finished {
            let outcome = match failure {
                Some(e) => Err(e),
                None => self.emit(global, updates_applied, changes_applied),
            };
            if let Some(tx) = completion_tx {
                let _ = tx.send(outcome);
            }
        }
    }

    fn emit(&self, global: StateStore, updates_applied: u64, changes_applied: u64) -> Completion {
        let report = CompletionReport {
            users: global.user_count(),
            keys: global.key_count(),
            shards: self.shard_count,
            updates_applied,
            changes_applied,
        };

        let snapshot = global.into_snapshot();
        self.sink.emit(&snapshot).map_err(PipelineError::Output)?;

        info!(
            users = report.users,
            keys = report.keys,
            updates = report.updates_applied,
            "final state emitted"
        );
        Ok(report)
    }
}

pub struct ComputeEngine {
    shards: Vec<ShardHandle>,
    coordinator: Arc<Coordinator>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    completion_rx: Mutex<Option<oneshot::Receiver<Completion>>>,
}

impl ComputeEngine {
    /// Spawn `config.compute_threads` shard actors on the current Tokio runtime.
    ///
    /// `expected_ingestors` is the number of `report_parsing_done` calls that
    /// close the parsing barrier.
    pub fn start(
        config: &PipelineConfig,
        expected_ingestors: usize,
        sink: Arc<dyn StateSink>,
    ) -> Arc<Self> {
        debug_assert!(expected_ingestors > 0, "Precondition: at least one ingestor");
        debug_assert!(config.compute_threads > 0, "Precondition: at least one shard");

        let (coordinator, completion_rx) =
            Coordinator::new(expected_ingestors, config.compute_threads, sink);
        let coordinator = Arc::new(coordinator);
        let cancel = CancellationToken::new();

        let mut shards = Vec::with_capacity(config.compute_threads);
        let mut tasks = Vec::with_capacity(config.compute_threads);
        for shard_id in 0..config.compute_threads {
            let (handle, task) = spawn_shard(
                shard_id,
                config.queue_capacity,
                config.queue_full_policy,
                coordinator.clone(),
                cancel.clone(),
            );
            shards.push(handle);
            tasks.push(task);
        }

        info!(
            shards = config.compute_threads,
            ingestors = expected_ingestors,
            queue_capacity = config.queue_capacity,
            policy = ?config.queue_full_policy,
            "compute engine started"
        );

        Arc::new(ComputeEngine {
            shards,
            coordinator,
            cancel,
            tasks: Mutex::new(tasks),
            completion_rx: Mutex::new(Some(completion_rx)),
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_for(&self, user: &str) -> usize {
        shard_index(user, self.shards.len())
    }

    /// Enqueue `record` on the shard owning its user
    pub async fn route_update(&self, record: UpdateRecord) -> Result<(), PipelineError> {
        let shard_idx = self.shard_for(&record.user);
        self.shards[shard_idx].send_update(record).await
    }

    /// Called once by each ingestor after its last `route_update` returned
    pub async fn report_parsing_done(&self) -> Result<(), PipelineError> {
        if !self.coordinator.record_parsing_done() {
            return Ok(());
        }

        info!(
            shards = self.shards.len(),
            "all ingestors finished, sending done signal to every shard"
        );
        for shard in &self.shards {
            shard.send_done().await?;
        }
        Ok(())
    }

    /// Merge one shard's final state. Normally called by the shard itself.
    pub fn report_shard_done(&self, report: ShardReport) {
        self.coordinator.report_shard_done(report);
    }

    /// Wait until every shard reported and the state was emitted.
    ///
    /// On timeout all shards are cancelled. Can be awaited once.
    pub async fn wait_for_completion(
        &self,
        timeout: Duration,
    ) -> Result<CompletionReport, PipelineError> {
        let completion_rx = self.completion_rx.lock().take().ok_or_else(|| {
            PipelineError::Internal("completion was already awaited".to_string())
        })?;

        match tokio::time::timeout(timeout, completion_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(PipelineError::Internal(
                "coordinator dropped the completion channel".to_string(),
            )),
            Err(_) => {
                warn!(?timeout, "compute phase timed out, cancelling shards");
                self.cancel();
                Err(PipelineError::Timeout {
                    phase: Phase::Compute,
                    after: timeout,
                })
            }
        }
    }

    /// Ask every shard to stop now. In-flight updates may be abandoned.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Await every shard task. Shards stop on their own after `Done` or after
    /// `cancel`, so call one of those paths first.
    pub async fn join(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for (shard_id, result) in futures::future::join_all(tasks).await.into_iter().enumerate() {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(shard_id, "shard task panicked: {}", e);
                }
            }
        }
    }
}
