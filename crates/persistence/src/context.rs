//! Persistence context.
//!
//! Owns every persistence resource of one editor process. Built once at
//! start-up by [`PersistenceContext::open`] and torn down by
//! [`PersistenceContext::shutdown`].

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::PersistenceConfig;
use crate::kv::{FileKeyValueStore, KvError};
use crate::lifecycle::LifecycleHooks;
use crate::migration::{MigrationOutcome, migrate_from_legacy_store};
use crate::queue::{DrainReport, WriteBehindQueue};
use crate::scheduler::{HostCapabilities, Scheduler, SchedulerHandle, SchedulerStrategy};
use crate::store::{ProjectStore, StoreError};

/// Queue type used by the editor: opaque JSON payloads into the file store.
pub type SaveQueue = WriteBehindQueue<Value, Arc<FileKeyValueStore>>;

/// Context start-up error.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("failed to open key/value store: {0}")]
    Kv(#[from] KvError),
    #[error("failed to open project store: {0}")]
    Store(#[from] StoreError),
}

/// Owner of the store, the queue, the scheduler and the lifecycle hooks.
#[derive(Debug)]
pub struct PersistenceContext {
    config: PersistenceConfig,
    store: ProjectStore,
    kv: Arc<FileKeyValueStore>,
    queue: Arc<SaveQueue>,
    hooks: LifecycleHooks,
    scheduler: Option<SchedulerHandle>,
    migration: MigrationOutcome,
}

impl PersistenceContext {
    /// Open the stores, migrate legacy data and start the save scheduler.
    ///
    /// Must be called inside a tokio runtime. A failed migration does not
    /// fail the open; inspect [`PersistenceContext::migration`].
    pub async fn open(
        config: PersistenceConfig,
        capabilities: HostCapabilities,
    ) -> Result<Self, ContextError> {
        let kv = Arc::new(FileKeyValueStore::open(config.kv_dir())?);

        let store = ProjectStore::new(config.database_path());
        store.init().await?;

        let migration = migrate_from_legacy_store(&store, &*kv, &config.legacy_key).await;
        if let MigrationOutcome::Failed { reason } = &migration {
            warn!(%reason, "legacy migration failed; it will be retried on next start");
        }

        let queue = Arc::new(
            WriteBehindQueue::new(kv.clone())
                .with_key_prefix(config.save_key_prefix.clone())
                .with_activity(capabilities.activity.clone()),
        );
        let hooks = LifecycleHooks::new(queue.clone());

        let strategy = SchedulerStrategy::probe(&capabilities, &config.scheduler);
        let scheduler = Scheduler::spawn(queue.clone(), strategy);

        info!(
            data_dir = ?config.data_dir,
            scheduler = scheduler.stats().strategy,
            migrated = migration.migrated(),
            "persistence context opened"
        );

        Ok(Self {
            config,
            store,
            kv,
            queue,
            hooks,
            scheduler: Some(scheduler),
            migration,
        })
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<SaveQueue> {
        &self.queue
    }

    pub fn store(&self) -> &ProjectStore {
        &self.store
    }

    /// The flat key/value store shared by the queue and the legacy record.
    pub fn kv(&self) -> &Arc<FileKeyValueStore> {
        &self.kv
    }

    pub fn hooks(&self) -> &LifecycleHooks {
        &self.hooks
    }

    /// Outcome of the migration run during [`PersistenceContext::open`].
    pub fn migration(&self) -> &MigrationOutcome {
        &self.migration
    }

    /// Stop the scheduler, flush the queue and close the store.
    ///
    /// Returns the report of the final flush.
    pub async fn shutdown(mut self) -> DrainReport {
        if let Some(scheduler) = self.scheduler.take() {
            let passes = scheduler.stats().passes;
            scheduler.shutdown().await;
            info!(passes, "save scheduler joined");
        }

        let queue = self.queue.clone();
        let report = match tokio::task::spawn_blocking(move || queue.flush()).await {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %err, "final flush panicked");
                DrainReport::default()
            }
        };

        self.store.close().await;
        info!(persisted = report.persisted, failed = report.failed, "persistence context shut down");
        report
    }
}
