use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use serde_json::{Value, json};
use uuid::Uuid;

use questdesk_core::{Category, ProjectSnapshot, TaskId};
use questdesk_persistence::{
    FileKeyValueStore, HostCapabilities, IdleSource, IdleWindow, KeyValueStore, LifecycleEvent,
    MigrationOutcome, PersistenceConfig, PersistenceContext, SchedulerConfig, SchedulerMode,
    StoreState,
};

/// A host that is never idle: the scheduler stays parked.
struct NeverIdle;

#[async_trait]
impl IdleSource for NeverIdle {
    async fn request_window(&self) -> IdleWindow {
        std::future::pending::<IdleWindow>().await
    }
}

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("questdesk-it-{}", Uuid::now_v7()))
}

fn config(dir: &Path) -> PersistenceConfig {
    PersistenceConfig::in_dir(dir).with_scheduler(
        SchedulerConfig::default()
            .with_mode(SchedulerMode::Interval)
            .with_poll_interval(Duration::from_millis(10)),
    )
}

#[tokio::test]
async fn legacy_data_is_migrated_once_and_saves_survive_restart() {
    let dir = temp_dir();
    let config = config(&dir);

    // Seed the legacy record the way the previous editor version left it.
    let legacy = FileKeyValueStore::open(config.kv_dir()).unwrap();
    legacy
        .set(
            &config.legacy_key,
            &json!({
                "state": {
                    "questFiles": { "f1": { "name": "Intro" } },
                    "questFolders": { "main": { "name": "Main", "files": ["f1"] } },
                    "activeFile": { "category": "quest", "id": "f1" }
                },
                "version": 0
            })
            .to_string(),
        )
        .unwrap();

    let ctx = PersistenceContext::open(config.clone(), HostCapabilities::headless())
        .await
        .unwrap();
    assert_eq!(ctx.migration(), &MigrationOutcome::Migrated { documents: 1 });
    assert_eq!(legacy.get(&config.legacy_key).unwrap(), None);

    let snapshot = ctx.store().load_project().await.unwrap().unwrap();
    assert_eq!(snapshot.quest_files["f1"]["name"], "Intro");
    assert!(snapshot.quest_folders.contains_key("main"));
    assert_eq!(snapshot.active_file.as_ref().map(|a| a.id.as_str()), Some("f1"));

    let id = TaskId::for_document(Category::Quest, "f1").unwrap();
    ctx.queue().enqueue(id.clone(), &json!({ "name": "Draft" }));
    ctx.queue().enqueue(id.clone(), &json!({ "name": "Intro, revised" }));
    let key = ctx.queue().storage_key(&id);

    let store = ctx.store().clone();
    ctx.shutdown().await;
    assert_eq!(store.state(), StoreState::Closed);

    let saved = legacy.get(&key).unwrap().unwrap();
    assert_eq!(
        serde_json::from_str::<Value>(&saved).unwrap()["name"],
        "Intro, revised"
    );

    // Second start: nothing left to migrate, snapshot intact.
    let ctx = PersistenceContext::open(config, HostCapabilities::headless())
        .await
        .unwrap();
    assert_eq!(ctx.migration(), &MigrationOutcome::NotNeeded);
    assert_eq!(ctx.store().load_project().await.unwrap(), Some(snapshot));
    ctx.shutdown().await;
}

#[tokio::test]
async fn terminating_event_flushes_before_shutdown() {
    let dir = temp_dir();
    let ctx = PersistenceContext::open(
        config(&dir).with_scheduler(SchedulerConfig::default().with_mode(SchedulerMode::Idle)),
        HostCapabilities::headless().with_idle_source(Arc::new(NeverIdle)),
    )
    .await
    .unwrap();

    let ids: Vec<TaskId> = ["i1", "i2", "i3"]
        .iter()
        .map(|d| TaskId::for_document(Category::Item, d).unwrap())
        .collect();
    for (n, id) in ids.iter().enumerate() {
        ctx.queue().enqueue(id.clone(), &json!({ "n": n }));
    }

    let hooks = ctx.hooks().clone();
    let report = tokio::task::spawn_blocking(move || hooks.notify(LifecycleEvent::Terminating))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.persisted, 3);
    assert!(ctx.queue().is_empty());
    for id in &ids {
        assert!(ctx.kv().get(&ctx.queue().storage_key(id)).unwrap().is_some());
    }

    let last = ctx.shutdown().await;
    assert_eq!(last.processed(), 0);
}

#[tokio::test]
async fn unreadable_legacy_record_does_not_block_start() {
    let dir = temp_dir();
    let config = config(&dir);
    let legacy = FileKeyValueStore::open(config.kv_dir()).unwrap();
    legacy.set(&config.legacy_key, "not json at all").unwrap();

    let ctx = PersistenceContext::open(config.clone(), HostCapabilities::headless())
        .await
        .unwrap();

    assert!(matches!(ctx.migration(), MigrationOutcome::Failed { .. }));
    assert_eq!(ctx.store().load_project().await.unwrap(), None::<ProjectSnapshot>);
    assert!(legacy.get(&config.legacy_key).unwrap().is_some());
    ctx.shutdown().await;
}
