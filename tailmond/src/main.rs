use std::path::Path;
use std::sync::Arc;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tailmond::cache::db::SnapshotDb;
use tailmond::cache::handle::CacheHandle;
use tailmond::catalog::ServiceCatalog;
use tailmond::config::Config;
use tailmond::exec::SystemRunner;
use tailmond::orchestrator::{MachineRefresh, Orchestrator};
use tailmond::scheduler;
use tailmond::table::TableHandle;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tailmond=info"))
        )
        .init();

    tracing::info!("Starting tailmond");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/tailmon/tailmond.toml".to_string());

    let config = if Path::new(&config_path).exists() {
        let config = Config::load(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path))?;
        tracing::info!("Loaded config from {}", config_path);
        config
    } else {
        tracing::info!("No config at {}, using defaults", config_path);
        Config::default()
    };

    let table = TableHandle::spawn();
    let mut orchestrator = Orchestrator::new(&config, Arc::new(SystemRunner), table.clone());

    // Without a cache the daemon still works, it just starts empty
    let cache = match SnapshotDb::open(&config.cache.db_path) {
        Ok(db) => {
            tracing::info!("Opened snapshot cache at {:?}", config.cache.db_path);
            let cache = CacheHandle::spawn(db);
            orchestrator = orchestrator.with_cache(cache.clone());
            Some(cache)
        }
        Err(e) => {
            tracing::warn!("Snapshot cache disabled: {:#}", e);
            None
        }
    };
    let orchestrator = Arc::new(orchestrator);

    if orchestrator.restore().await? {
        tracing::info!("Serving cached machines until the first refresh");
    }

    match orchestrator.update_machines().await {
        Ok(MachineRefresh::Updated { machines, .. }) => tracing::info!("Found {} machines", machines),
        Ok(MachineRefresh::AlreadyRunning) => {}
        Err(e) => tracing::error!("Initial machine refresh failed: {}", e),
    }

    let catalog = Arc::new(ServiceCatalog::new(config.services.clone()));
    tracing::info!("Probing {} services per machine", catalog.len());

    let cancel = CancellationToken::new();

    let sched_handle = tokio::spawn(scheduler::run(
        orchestrator.clone(),
        catalog,
        config.timers.clone(),
        config.scanning.timeout(),
        cancel.clone(),
    ));

    // Log table activity until shutdown
    let watch_cancel = cancel.clone();
    let mut revisions = table.subscribe();
    let watch_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = revisions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let revision = *revisions.borrow_and_update();
                    tracing::debug!("Status table at revision {}", revision);
                }
                _ = watch_cancel.cancelled() => break,
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();

    let _ = tokio::join!(sched_handle, watch_handle);

    if let Err(e) = table.shutdown().await {
        tracing::error!("Failed to shutdown status table: {}", e);
    }

    if let Some(cache) = cache {
        if let Err(e) = cache.shutdown().await {
            tracing::error!("Failed to shutdown cache: {}", e);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
