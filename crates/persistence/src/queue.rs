//! Write-behind save queue.
//!
//! UI edits fire far more often than the underlying store should be written.
//! The queue keeps only the latest pending payload per [`TaskId`] and writes
//! it later, when the scheduler grants a drain pass or the host flushes on
//! shutdown. Delivery is best-effort: an entry whose write fails is logged
//! and dropped, never retried.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, trace};

use questdesk_core::TaskId;

use crate::kv::{KeyValueStore, KvError};
use crate::scheduler::{ActivityMonitor, IdleDeadline};

/// Key prefix used for persisted save tasks unless overridden.
pub const DEFAULT_KEY_PREFIX: &str = "save:";

/// A pending write, owned by the queue from enqueue until drain.
#[derive(Debug, Clone)]
pub struct SaveTask<P> {
    pub id: TaskId,
    pub payload: P,
    pub enqueued_at: DateTime<Utc>,
    /// Queue-wide enqueue stamp; distinguishes a task from a later overwrite.
    pub sequence: u64,
}

/// Cumulative queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    /// Enqueues that replaced a pending task for the same id.
    pub coalesced: u64,
    pub persisted: u64,
    pub failed: u64,
    pub drain_passes: u64,
}

/// Outcome of a single drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub persisted: usize,
    pub failed: usize,
    /// Snapshot entries overwritten during the pass (left for the next pass).
    pub superseded: usize,
    /// Entries still pending when the pass ended.
    pub remaining: usize,
    pub budget_exhausted: bool,
}

impl DrainReport {
    /// Number of entries this pass removed from the queue.
    pub fn processed(&self) -> usize {
        self.persisted + self.failed
    }
}

#[derive(Debug, thiserror::Error)]
enum PersistError {
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("write failed: {0}")]
    Write(#[from] KvError),
}

#[derive(Debug)]
struct QueueState<P> {
    tasks: HashMap<TaskId, SaveTask<P>>,
    next_sequence: u64,
    stats: QueueStats,
}

/// In-memory write-behind queue persisting into a [`KeyValueStore`].
///
/// Shared behind an `Arc`; the state lock is never held across a store write
/// or an `.await`. Drain passes are serialized by a separate lock, so a flush
/// issued while a scheduled pass is writing waits for that pass to finish.
#[derive(Debug)]
pub struct WriteBehindQueue<P, S> {
    state: Mutex<QueueState<P>>,
    drain_lock: Mutex<()>,
    store: S,
    key_prefix: String,
    wake: Notify,
    activity: Arc<ActivityMonitor>,
}

impl<P, S> WriteBehindQueue<P, S>
where
    P: Clone + Serialize,
    S: KeyValueStore,
{
    /// Create an empty queue writing into `store`.
    pub fn new(store: S) -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: HashMap::new(),
                next_sequence: 0,
                stats: QueueStats::default(),
            }),
            drain_lock: Mutex::new(()),
            store,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            wake: Notify::new(),
            activity: Arc::new(ActivityMonitor::new()),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Share an activity monitor with an idle source (see the scheduler).
    pub fn with_activity(mut self, activity: Arc<ActivityMonitor>) -> Self {
        self.activity = activity;
        self
    }

    pub fn activity(&self) -> Arc<ActivityMonitor> {
        self.activity.clone()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Key under which the task `id` is persisted.
    pub fn storage_key(&self, id: &TaskId) -> String {
        format!("{}{}", self.key_prefix, id)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a copy of `data` under `id`, replacing any pending task for it.
    ///
    /// Performs no I/O. Wakes the scheduler if it is parked on an empty queue.
    pub fn enqueue(&self, id: TaskId, data: &P) {
        let payload = data.clone();
        {
            let mut state = self.lock();
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.stats.enqueued += 1;

            let task = SaveTask {
                id: id.clone(),
                payload,
                enqueued_at: Utc::now(),
                sequence,
            };
            if state.tasks.insert(id.clone(), task).is_some() {
                state.stats.coalesced += 1;
                trace!(task_id = %id, "coalesced pending save");
            }
        }

        self.activity.touch();
        self.wake.notify_one();
    }

    /// Persist pending entries, oldest first.
    ///
    /// Works on the entries present when the call starts; anything enqueued
    /// during the pass waits for the next one. With a `budget`, the pass stops
    /// as soon as it reports no time remaining. Every processed entry leaves the
    /// queue whether its write succeeded or not. Only one pass runs at a time;
    /// a concurrent call blocks until the running pass returns.
    pub fn drain(&self, budget: Option<&dyn IdleDeadline>) -> DrainReport {
        let _pass = self.drain_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut pending: Vec<(TaskId, u64)> = self
            .lock()
            .tasks
            .values()
            .map(|t| (t.id.clone(), t.sequence))
            .collect();
        pending.sort_by_key(|(_, sequence)| *sequence);

        let mut report = DrainReport::default();

        for (id, sequence) in pending {
            if let Some(budget) = budget {
                if budget.time_remaining().is_zero() {
                    report.budget_exhausted = true;
                    break;
                }
            }

            let task = {
                let mut state = self.lock();
                match state.tasks.get(&id) {
                    Some(task) if task.sequence == sequence => state.tasks.remove(&id),
                    _ => None,
                }
            };
            let Some(task) = task else {
                report.superseded += 1;
                continue;
            };

            match self.persist(&task) {
                Ok(()) => report.persisted += 1,
                Err(err) => {
                    error!(task_id = %task.id, error = %err, "dropping save task after failed write");
                    report.failed += 1;
                }
            }
        }

        let mut state = self.lock();
        state.stats.drain_passes += 1;
        state.stats.persisted += report.persisted as u64;
        state.stats.failed += report.failed as u64;
        report.remaining = state.tasks.len();
        drop(state);

        if report.processed() > 0 || report.budget_exhausted {
            debug!(
                persisted = report.persisted,
                failed = report.failed,
                remaining = report.remaining,
                budget_exhausted = report.budget_exhausted,
                "drained save queue"
            );
        }

        report
    }

    /// Drain every pending entry regardless of budget.
    pub fn flush(&self) -> DrainReport {
        self.drain(None)
    }

    fn persist(&self, task: &SaveTask<P>) -> Result<(), PersistError> {
        let json = serde_json::to_string(&task.payload)?;
        self.store.set(&self.storage_key(&task.id), &json)?;
        Ok(())
    }

    /// Number of pending entries.
    pub fn size(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Pending ids in enqueue order.
    pub fn pending_ids(&self) -> Vec<TaskId> {
        let state = self.lock();
        let mut tasks: Vec<_> = state.tasks.values().collect();
        tasks.sort_by_key(|t| t.sequence);
        tasks.into_iter().map(|t| t.id.clone()).collect()
    }

    pub fn stats(&self) -> QueueStats {
        self.lock().stats.clone()
    }

    /// Resolve once the queue holds at least one entry.
    pub async fn wait_for_work(&self) {
        loop {
            let notified = self.wake.notified();
            if !self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}
