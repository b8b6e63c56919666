//! `questdesk-persistence`
//!
//! **Responsibility:** local persistence core of the questdesk editor.
//!
//! This crate provides:
//! - A write-behind save queue that coalesces frequent edits by id
//! - Idle-time (or fixed-interval) scheduling of queue drains
//! - A versioned SQLite store for the single project snapshot
//! - One-time migration from the legacy flat key/value store
//! - Lifecycle hooks the host wires to its shutdown/visibility signals
//!
//! Everything is owned by a [`PersistenceContext`] built once at start-up.

pub mod config;
pub mod context;
pub mod kv;
pub mod lifecycle;
pub mod migration;
pub mod queue;
pub mod scheduler;
pub mod store;

pub use config::{ConfigError, PersistenceConfig, SchedulerConfig, SchedulerMode};
pub use context::{ContextError, PersistenceContext, SaveQueue};
pub use kv::{FileKeyValueStore, InMemoryKeyValueStore, KeyValueStore, KvError};
pub use lifecycle::{Flush, LifecycleEvent, LifecycleHooks, wait_for_termination};
pub use migration::{migrate_from_legacy_store, MigrationOutcome};
pub use queue::{DrainReport, QueueStats, SaveTask, WriteBehindQueue};
pub use scheduler::{
    ActivityIdleSource, ActivityMonitor, Deadline, HostCapabilities, IdleDeadline, IdleSource,
    IdleWindow, Scheduler, SchedulerHandle, SchedulerStats, SchedulerStrategy, Unlimited,
};
pub use store::{ProjectStore, StoreError, StoreState, SCHEMA_VERSION};
