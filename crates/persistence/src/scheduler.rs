//! Background scheduling of queue drains.
//!
//! Two interchangeable strategies satisfy the same contract (periodically
//! call [`WriteBehindQueue::drain`] with a best-effort budget):
//!
//! - **Idle**: wait for the host to grant a low-priority window and drain
//!   only for the time that window leaves.
//! - **Fixed interval**: tick on a timer and drain everything (unlimited
//!   budget). Used when the host offers no idle primitive.
//!
//! The strategy is chosen once, at start-up, by [`SchedulerStrategy::probe`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{SchedulerConfig, SchedulerMode};
use crate::kv::KeyValueStore;
use crate::queue::WriteBehindQueue;

/// Remaining-time estimate for a drain pass.
pub trait IdleDeadline {
    fn time_remaining(&self) -> Duration;
}

/// Budget that never runs out.
#[derive(Debug, Copy, Clone, Default)]
pub struct Unlimited;

impl IdleDeadline for Unlimited {
    fn time_remaining(&self) -> Duration {
        Duration::MAX
    }
}

/// Budget ending at a fixed instant.
#[derive(Debug, Copy, Clone)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }
}

impl IdleDeadline for Deadline {
    fn time_remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }
}

/// A low-priority execution window granted by the host.
#[derive(Debug, Copy, Clone)]
pub struct IdleWindow {
    deadline: Deadline,
    /// The window was forced by the maximum wait rather than real idleness.
    pub did_timeout: bool,
}

impl IdleWindow {
    pub fn new(budget: Duration) -> Self {
        Self {
            deadline: Deadline::after(budget),
            did_timeout: false,
        }
    }

    pub fn timed_out(budget: Duration) -> Self {
        Self {
            deadline: Deadline::after(budget),
            did_timeout: true,
        }
    }
}

impl IdleDeadline for IdleWindow {
    fn time_remaining(&self) -> Duration {
        self.deadline.time_remaining()
    }
}

/// Host primitive granting low-priority execution windows.
#[async_trait]
pub trait IdleSource: Send + Sync {
    /// Wait until the host is idle and return the window it grants.
    async fn request_window(&self) -> IdleWindow;
}

/// Tracks the time of the most recent user activity.
#[derive(Debug)]
pub struct ActivityMonitor {
    last: Mutex<Instant>,
}

impl ActivityMonitor {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    /// Record activity now (an edit, a keystroke, ...).
    pub fn touch(&self) {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Idle source that considers the host idle after a quiet period without
/// activity.
///
/// While activity keeps arriving, a window is still forced once `max_wait`
/// has passed so that pending writes are not starved.
#[derive(Debug)]
pub struct ActivityIdleSource {
    activity: Arc<ActivityMonitor>,
    quiet_period: Duration,
    window: Duration,
    max_wait: Duration,
}

impl ActivityIdleSource {
    pub fn new(activity: Arc<ActivityMonitor>, config: &SchedulerConfig) -> Self {
        Self {
            activity,
            quiet_period: config.idle_quiet_period,
            window: config.idle_window,
            max_wait: config.idle_max_wait,
        }
    }
}

#[async_trait]
impl IdleSource for ActivityIdleSource {
    async fn request_window(&self) -> IdleWindow {
        let started = Instant::now();
        loop {
            let idle = self.activity.idle_for();
            if idle >= self.quiet_period {
                return IdleWindow::new(self.window);
            }

            let waited = started.elapsed();
            if waited >= self.max_wait {
                return IdleWindow::timed_out(self.window);
            }

            let until_quiet = self.quiet_period - idle;
            let until_forced = self.max_wait - waited;
            tokio::time::sleep(until_quiet.min(until_forced)).await;
        }
    }
}

/// What the host environment offers the scheduler.
#[derive(Clone)]
pub struct HostCapabilities {
    pub activity: Arc<ActivityMonitor>,
    pub idle_source: Option<Arc<dyn IdleSource>>,
}

impl HostCapabilities {
    /// A host without any idle primitive (services, tests, CLIs).
    pub fn headless() -> Self {
        Self {
            activity: Arc::new(ActivityMonitor::new()),
            idle_source: None,
        }
    }

    /// An interactive host whose idleness is derived from recorded activity.
    pub fn interactive(config: &SchedulerConfig) -> Self {
        let activity = Arc::new(ActivityMonitor::new());
        let idle_source: Arc<dyn IdleSource> =
            Arc::new(ActivityIdleSource::new(activity.clone(), config));
        Self {
            activity,
            idle_source: Some(idle_source),
        }
    }

    pub fn with_idle_source(mut self, source: Arc<dyn IdleSource>) -> Self {
        self.idle_source = Some(source);
        self
    }
}

impl core::fmt::Debug for HostCapabilities {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostCapabilities")
            .field("idle_source", &self.idle_source.is_some())
            .finish()
    }
}

/// Admission policy for drain passes.
#[derive(Clone)]
pub enum SchedulerStrategy {
    Idle(Arc<dyn IdleSource>),
    FixedInterval(Duration),
}

impl SchedulerStrategy {
    /// Pick a strategy from what the host offers and what is configured.
    pub fn probe(capabilities: &HostCapabilities, config: &SchedulerConfig) -> Self {
        match (config.mode, &capabilities.idle_source) {
            (SchedulerMode::Interval, _) => Self::FixedInterval(config.poll_interval),
            (SchedulerMode::Auto | SchedulerMode::Idle, Some(source)) => Self::Idle(source.clone()),
            (SchedulerMode::Idle, None) => {
                warn!("idle scheduling requested but host has no idle source; polling instead");
                Self::FixedInterval(config.poll_interval)
            }
            (SchedulerMode::Auto, None) => Self::FixedInterval(config.poll_interval),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle(_) => "idle",
            Self::FixedInterval(_) => "fixed-interval",
        }
    }
}

impl core::fmt::Debug for SchedulerStrategy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Idle(_) => f.write_str("Idle"),
            Self::FixedInterval(period) => f.debug_tuple("FixedInterval").field(period).finish(),
        }
    }
}

/// Scheduler runtime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub strategy: &'static str,
    pub passes: u64,
}

/// Handle to control a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: Arc<Notify>,
    join: Option<JoinHandle<()>>,
    passes: Arc<AtomicU64>,
    strategy: &'static str,
}

impl SchedulerHandle {
    /// Request shutdown and wait for the loop to stop.
    ///
    /// A pass already in progress runs to completion first.
    pub async fn shutdown(mut self) {
        self.shutdown.notify_one();
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                warn!(error = %err, "save scheduler task ended abnormally");
            }
        }
    }

    /// Number of drain passes run so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            strategy: self.strategy,
            passes: self.passes.load(Ordering::Relaxed),
        }
    }
}

/// Background drain loop for a [`WriteBehindQueue`].
#[derive(Debug)]
pub struct Scheduler;

impl Scheduler {
    /// Spawn the drain loop on the current tokio runtime.
    ///
    /// The loop parks while the queue is empty, then waits for a window
    /// (idle) or a tick (interval) and drains.
    pub fn spawn<P, S>(queue: Arc<WriteBehindQueue<P, S>>, strategy: SchedulerStrategy) -> SchedulerHandle
    where
        P: Clone + serde::Serialize + Send + Sync + 'static,
        S: KeyValueStore + 'static,
    {
        let shutdown = Arc::new(Notify::new());
        let passes = Arc::new(AtomicU64::new(0));
        let name = strategy.name();

        let join = tokio::spawn(scheduler_loop(
            queue,
            strategy,
            shutdown.clone(),
            passes.clone(),
        ));

        SchedulerHandle {
            shutdown,
            join: Some(join),
            passes,
            strategy: name,
        }
    }
}

async fn scheduler_loop<P, S>(
    queue: Arc<WriteBehindQueue<P, S>>,
    strategy: SchedulerStrategy,
    shutdown: Arc<Notify>,
    passes: Arc<AtomicU64>,
) where
    P: Clone + serde::Serialize + Send + Sync + 'static,
    S: KeyValueStore + 'static,
{
    info!(strategy = strategy.name(), "save scheduler started");

    let mut ticker = match &strategy {
        SchedulerStrategy::FixedInterval(period) => {
            let mut ticker = tokio::time::interval(*period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            Some(ticker)
        }
        SchedulerStrategy::Idle(_) => None,
    };

    loop {
        tokio::select! {
            biased;
            _ = shutdown.notified() => break,
            _ = queue.wait_for_work() => {}
        }

        let budget: Option<IdleWindow> = match (&strategy, ticker.as_mut()) {
            (SchedulerStrategy::Idle(source), _) => {
                tokio::select! {
                    biased;
                    _ = shutdown.notified() => break,
                    window = source.request_window() => Some(window),
                }
            }
            (SchedulerStrategy::FixedInterval(_), Some(ticker)) => {
                tokio::select! {
                    biased;
                    _ = shutdown.notified() => break,
                    _ = ticker.tick() => None,
                }
            }
            (SchedulerStrategy::FixedInterval(period), None) => {
                tokio::time::sleep(*period).await;
                None
            }
        };

        let pass_queue = queue.clone();
        let drained = tokio::task::spawn_blocking(move || match budget {
            Some(window) => pass_queue.drain(Some(&window)),
            None => pass_queue.drain(None),
        })
        .await;

        match drained {
            Ok(report) => {
                passes.fetch_add(1, Ordering::Relaxed);
                if report.budget_exhausted {
                    debug!(remaining = report.remaining, "idle window exhausted; resuming next window");
                }
            }
            Err(err) => warn!(error = %err, "drain pass panicked"),
        }
    }

    info!(
        strategy = strategy.name(),
        passes = passes.load(Ordering::Relaxed),
        "save scheduler stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use questdesk_core::TaskId;

    use crate::kv::InMemoryKeyValueStore;

    type TestQueue = WriteBehindQueue<Value, Arc<InMemoryKeyValueStore>>;

    fn test_queue() -> Arc<TestQueue> {
        Arc::new(WriteBehindQueue::new(InMemoryKeyValueStore::arc()))
    }

    fn id(s: &str) -> TaskId {
        TaskId::parse(s).unwrap()
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Idle source handing out whatever windows the test sends it.
    struct ScriptedIdleSource {
        windows: tokio::sync::Mutex<mpsc::UnboundedReceiver<IdleWindow>>,
    }

    #[async_trait]
    impl IdleSource for ScriptedIdleSource {
        async fn request_window(&self) -> IdleWindow {
            match self.windows.lock().await.recv().await {
                Some(window) => window,
                None => std::future::pending::<IdleWindow>().await,
            }
        }
    }

    #[test]
    fn deadlines_count_down() {
        assert_eq!(Unlimited.time_remaining(), Duration::MAX);
        assert!(Deadline::after(Duration::ZERO).time_remaining().is_zero());
        assert!(Deadline::after(Duration::from_secs(60)).time_remaining() > Duration::from_secs(59));
    }

    #[test]
    fn probe_falls_back_to_interval_without_idle_source() {
        let config = SchedulerConfig::default().with_mode(SchedulerMode::Idle);
        let strategy = SchedulerStrategy::probe(&HostCapabilities::headless(), &config);
        assert!(matches!(strategy, SchedulerStrategy::FixedInterval(p) if p == config.poll_interval));
    }

    #[test]
    fn probe_prefers_idle_when_available() {
        let config = SchedulerConfig::default();
        let caps = HostCapabilities::interactive(&config);
        assert_eq!(SchedulerStrategy::probe(&caps, &config).name(), "idle");

        let forced = config.with_mode(SchedulerMode::Interval);
        assert_eq!(SchedulerStrategy::probe(&caps, &forced).name(), "fixed-interval");
    }

    #[tokio::test]
    async fn interval_strategy_drains_pending_writes() {
        let queue = test_queue();
        let handle = Scheduler::spawn(
            queue.clone(),
            SchedulerStrategy::FixedInterval(Duration::from_millis(10)),
        );

        queue.enqueue(id("quest:f1"), &json!({ "name": "Intro" }));
        eventually(|| queue.is_empty()).await;

        assert_eq!(
            queue.store().get("save:quest:f1").unwrap().as_deref(),
            Some(r#"{"name":"Intro"}"#)
        );
        assert!(handle.stats().passes >= 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn idle_strategy_respects_window_budget() {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Arc::new(ScriptedIdleSource {
            windows: tokio::sync::Mutex::new(rx),
        });

        let queue = test_queue();
        queue.enqueue(id("a"), &json!(1));
        queue.enqueue(id("b"), &json!(2));

        let handle = Scheduler::spawn(queue.clone(), SchedulerStrategy::Idle(source));

        // A window with no time left processes nothing.
        tx.send(IdleWindow::new(Duration::ZERO)).unwrap();
        eventually(|| handle.stats().passes == 1).await;
        assert_eq!(queue.size(), 2);

        tx.send(IdleWindow::new(Duration::from_secs(5))).unwrap();
        eventually(|| queue.is_empty()).await;
        assert_eq!(queue.store().len(), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn activity_source_waits_for_quiet_period() {
        let config = SchedulerConfig::default()
            .with_idle_quiet_period(Duration::from_millis(30))
            .with_idle_window(Duration::from_millis(20))
            .with_idle_max_wait(Duration::from_secs(5));
        let activity = Arc::new(ActivityMonitor::new());
        let source = ActivityIdleSource::new(activity.clone(), &config);

        activity.touch();
        let started = Instant::now();
        let window = source.request_window().await;

        assert!(started.elapsed() >= Duration::from_millis(25));
        assert!(!window.did_timeout);
    }

    #[tokio::test]
    async fn activity_source_forces_window_after_max_wait() {
        let config = SchedulerConfig::default()
            .with_idle_quiet_period(Duration::from_secs(60))
            .with_idle_max_wait(Duration::from_millis(20));
        let activity = Arc::new(ActivityMonitor::new());
        let source = ActivityIdleSource::new(activity, &config);

        let window = tokio::time::timeout(Duration::from_secs(2), source.request_window())
            .await
            .expect("window should be forced");
        assert!(window.did_timeout);
    }

    #[tokio::test]
    async fn shutdown_stops_a_parked_scheduler() {
        let queue = test_queue();
        let handle = Scheduler::spawn(
            queue,
            SchedulerStrategy::FixedInterval(Duration::from_millis(10)),
        );
        tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .expect("scheduler should stop");
    }
}
