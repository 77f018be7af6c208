//! Daemon lifecycle: register, connect, populate, hydrate, refresh, shut down.

use anyhow::{Context, Result};
use opendal::Operator;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use stratus_cloudfilter::{
    HydrationStatsSnapshot, HydrationWorkers, PlaceholderManager, SyncRootProvider, WorkerConfig,
};
use stratus_core::config::{StorageConfig, StratusConfig};
use stratus_core::types::Catalog;
use stratus_storage::Credentials;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::remote::RemoteSource;
use crate::sync;

/// Run against the OS facility until Ctrl-C.
pub async fn run(config: StratusConfig) -> Result<()> {
    info!("daemon starting");

    let provider = SyncRootProvider::native()?;
    let op = connect_storage(&config.storage).await?;

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(e) => error!("listening for Ctrl-C failed: {e}"),
        }
    };
    serve(&config, provider, op, shutdown).await?;
    Ok(())
}

/// Build the storage operator and verify connectivity. A failed health
/// check is logged and the operator kept: hydration retries per request.
pub async fn connect_storage(storage: &StorageConfig) -> Result<Operator> {
    let credentials = if stratus_storage::needs_credentials(storage) {
        Some(Credentials::from_env()?)
    } else {
        None
    };
    let op = stratus_storage::build_operator(storage, credentials.as_ref())?;
    match stratus_storage::check_health(&op, &storage.remote_prefix).await {
        Ok(()) => info!(backend = %storage.backend, endpoint = %storage.endpoint, "storage: connected"),
        Err(e) => warn!(backend = %storage.backend, endpoint = %storage.endpoint, "storage: {e:#}"),
    }
    Ok(op)
}

/// Serve one sync root until `shutdown` resolves.
///
/// In-flight hydrations are answered and queued ones failed before the
/// connection is closed, so no reader is left waiting on a dead provider.
pub async fn serve(
    config: &StratusConfig,
    provider: SyncRootProvider,
    op: Operator,
    shutdown: impl Future<Output = ()>,
) -> Result<HydrationStatsSnapshot> {
    let root = config.sync_root.path.clone();
    std::fs::create_dir_all(&root)
        .with_context(|| format!("creating sync root {}", root.display()))?;

    provider.registrar().register(
        &root,
        &config.sync_root.display_name,
        &config.sync_root.provider_version,
    )?;

    let (dispatcher, feed) = provider.hydration_channel(config.hydration.queue_capacity);
    let stats = dispatcher.stats();
    let connection = provider.connections().connect(&root, Arc::new(dispatcher))?;

    let placeholders = provider.placeholders();
    let prefix = config.storage.remote_prefix.clone();
    let catalog = match stratus_storage::load_catalog(&op, &prefix).await {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!("initial catalog load failed: {e:#}  (starting empty)");
            Catalog::new()
        }
    };
    let report =
        sync::apply_diff_blocking(placeholders.clone(), root.clone(), Catalog::new().diff(&catalog))
            .await;
    info!(
        root = %root.display(),
        entries = catalog.len(),
        created = report.created,
        failed = report.failed,
        "sync root populated"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let workers = HydrationWorkers::new(
        Arc::new(RemoteSource::new(op.clone())),
        provider.responder(),
        WorkerConfig::from_config(config),
    );
    let worker_task = tokio::spawn(workers.run(feed, shutdown_tx.subscribe()));

    let refresh_task = (config.catalog.refresh_secs > 0).then(|| {
        tokio::spawn(refresh_loop(
            op,
            prefix,
            placeholders,
            root.clone(),
            catalog,
            Duration::from_secs(config.catalog.refresh_secs),
            shutdown_tx.subscribe(),
        ))
    });

    info!(root = %root.display(), connection = %connection.key(), "serving hydration requests");
    shutdown.await;

    let _ = shutdown_tx.send(());
    if let Err(e) = worker_task.await {
        error!("hydration worker task failed: {e}");
    }
    if let Some(task) = refresh_task {
        if let Err(e) = task.await {
            error!("catalog refresh task failed: {e}");
        }
    }

    connection.disconnect();
    if config.sync_root.unregister_on_exit {
        if let Err(e) = provider.registrar().unregister(&root) {
            warn!("unregister on exit failed: {e}");
        }
    }

    let snapshot = stats.snapshot();
    info!(
        arrived = snapshot.arrived,
        answered = snapshot.answered,
        failed = snapshot.failed,
        rejected = snapshot.rejected,
        abandoned = snapshot.abandoned,
        cancelled = snapshot.cancelled,
        "daemon stopped"
    );
    Ok(snapshot)
}

async fn refresh_loop(
    op: Operator,
    prefix: String,
    placeholders: PlaceholderManager,
    root: std::path::PathBuf,
    mut current: Catalog,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = interval.tick() => {
                current = refresh_once(&op, &prefix, &placeholders, &root, current).await;
            }
        }
    }
}

async fn refresh_once(
    op: &Operator,
    prefix: &str,
    placeholders: &PlaceholderManager,
    root: &Path,
    current: Catalog,
) -> Catalog {
    let newer = match stratus_storage::load_catalog(op, prefix).await {
        Ok(newer) => newer,
        Err(e) => {
            warn!("catalog refresh failed: {e:#}");
            return current;
        }
    };
    let diff = current.diff(&newer);
    if !diff.is_empty() {
        sync::apply_diff_blocking(placeholders.clone(), root.to_path_buf(), diff).await;
    }
    newer
}
