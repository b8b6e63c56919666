use anyhow::Context;
use questdesk_core::Category;
use questdesk_persistence::{
    HostCapabilities, LifecycleEvent, PersistenceConfig, PersistenceContext, wait_for_termination,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    questdesk_observability::init();

    let config = PersistenceConfig::from_env().context("invalid QUESTDESK_* configuration")?;
    let capabilities = HostCapabilities::interactive(&config.scheduler);

    let ctx = PersistenceContext::open(config, capabilities)
        .await
        .context("failed to open persistence context")?;

    match ctx.store().load_project().await.context("failed to load project")? {
        Some(snapshot) => {
            for category in Category::ALL {
                tracing::info!(
                    category = category.as_str(),
                    documents = snapshot.files(category).len(),
                    folders = snapshot.folders(category).len(),
                    "project loaded"
                );
            }
        }
        None => tracing::info!("no project saved yet"),
    }

    wait_for_termination()
        .await
        .context("failed to install termination handler")?;

    let hooks = ctx.hooks().clone();
    tokio::task::spawn_blocking(move || hooks.notify(LifecycleEvent::Terminating))
        .await
        .context("termination flush panicked")?;

    let report = ctx.shutdown().await;
    tracing::info!(persisted = report.persisted, "questdesk host stopped");

    Ok(())
}
