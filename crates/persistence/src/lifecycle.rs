//! Lifecycle hooks.
//!
//! The persistence core does not listen to the host on its own. The host
//! forwards its shutdown and visibility signals as [`LifecycleEvent`]s, and the
//! hooks decide whether the save queue must be flushed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::{debug, info};

use crate::kv::KeyValueStore;
use crate::queue::{DrainReport, WriteBehindQueue};

/// Host signal relevant to persistence.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The process is about to exit.
    Terminating,
    /// The editor window is hidden or minimized.
    Hidden,
    /// The editor window became visible again.
    Visible,
}

impl LifecycleEvent {
    /// Whether this event requires pending writes to hit storage now.
    pub fn requires_flush(self) -> bool {
        matches!(self, LifecycleEvent::Terminating | LifecycleEvent::Hidden)
    }
}

/// Something that can write out everything it holds, synchronously.
pub trait Flush: Send + Sync {
    fn flush(&self) -> DrainReport;
}

impl<P, S> Flush for WriteBehindQueue<P, S>
where
    P: Clone + Serialize + Send,
    S: KeyValueStore,
{
    fn flush(&self) -> DrainReport {
        WriteBehindQueue::flush(self)
    }
}

/// Dispatches host lifecycle events to the save queue.
#[derive(Clone)]
pub struct LifecycleHooks {
    target: Arc<dyn Flush>,
    flushes: Arc<AtomicU64>,
}

impl LifecycleHooks {
    pub fn new(target: Arc<dyn Flush>) -> Self {
        Self {
            target,
            flushes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle `event`; returns the flush report when the event flushed.
    ///
    /// Runs on the caller's thread and returns only after every pending
    /// write has been attempted. The flush does blocking file I/O; async
    /// callers should run it through `tokio::task::spawn_blocking`. A drain
    /// pass already running in the scheduler finishes first.
    pub fn notify(&self, event: LifecycleEvent) -> Option<DrainReport> {
        if !event.requires_flush() {
            debug!(?event, "lifecycle event ignored");
            return None;
        }

        let report = self.target.flush();
        self.flushes.fetch_add(1, Ordering::Relaxed);
        info!(
            ?event,
            persisted = report.persisted,
            failed = report.failed,
            "flushed save queue on lifecycle event"
        );
        Some(report)
    }

    /// How many events triggered a flush.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl core::fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LifecycleHooks")
            .field("flushes", &self.flush_count())
            .finish()
    }
}

/// Resolve when the process receives Ctrl-C (or SIGTERM on unix).
pub async fn wait_for_termination() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = term.recv() => {}
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
