//! Replica mode: assembles every cfgrid component for one replica and
//! serves the REST API until Ctrl-C.
//!
//! A replica without `store.remote` owns the shared store and serves it to
//! the others next to its API. Store mode serves only the store.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use cfgrid_core::CfgridConfig;
use cfgrid_health::{LocalStatus, StatusAggregator, StatusPublisher};
use cfgrid_rollout::{ConfigFollower, RolloutCoordinator};
use cfgrid_snapshot::{ConfigStore, GitSource, NoRepository, VersionSource, checkout_snapshot};
use cfgrid_state::{Color, StateStore};

/// Run one replica.
pub async fn run(config: CfgridConfig) -> anyhow::Result<()> {
    let replica = config.replica_id();
    info!(service = %config.node.service, %replica, "cfgrid replica starting");

    // ── Shared store ─────────────────────────────────────────────
    let store = open_store(&config)?;

    // ── Configuration source and snapshot ───────────────────────
    let source: Arc<dyn VersionSource> = match &config.repository.url {
        Some(url) => Arc::new(GitSource::new(url.as_str(), config.repository.work_dir.clone())),
        None => {
            warn!("no repository configured, only canned bundles can be rolled out");
            Arc::new(NoRepository)
        }
    };
    let snapshots = ConfigStore::new(&config.repository.serving_root);

    let aggregator = StatusAggregator::new(
        store.clone(),
        config.status.table.as_str(),
        config.status.table_ttl,
    );
    let publisher = StatusPublisher::new(
        aggregator,
        &config.node.service,
        &replica,
        LocalStatus::new(Color::Amber, "").with_progress("starting"),
    );

    let initial = load_initial(&config, source.as_ref(), &snapshots).await;
    if let Err(e) = publisher.set(initial).await {
        error!(error = %e, "failed to publish initial status");
    }

    // ── Rollouts ─────────────────────────────────────────────────
    let coordinator = RolloutCoordinator::from_config(
        store.clone(),
        &config,
        snapshots.clone(),
        source.clone(),
        publisher.clone(),
    );
    let follower = ConfigFollower::new(snapshots, source, publisher.clone());
    let subscription = store.subscribe(&config.rollout.channel).await?;

    // ── Background tasks ─────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let publisher_handle = tokio::spawn(publisher.run(
        config.status.publish_interval,
        config.status.reset_hour_utc,
        shutdown_rx.clone(),
    ));
    let follower_handle = tokio::spawn(follower.run(subscription, shutdown_rx));

    // ── API server ───────────────────────────────────────────────
    let mut router = cfgrid_api::build_router(coordinator);
    if store.is_local() {
        router = router.merge(cfgrid_state::server::router(store));
    }
    let addr = SocketAddr::from(([0, 0, 0, 0], config.node.port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            wait_for_ctrl_c().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = publisher_handle.await;
    let _ = follower_handle.await;

    info!("cfgrid replica stopped");
    Ok(())
}

/// Own the shared store and serve it to remote replicas, nothing else.
pub async fn run_store(config: CfgridConfig) -> anyhow::Result<()> {
    if config.store.remote.is_some() {
        anyhow::bail!("store mode owns the database; unset store.remote");
    }
    let store = open_store(&config)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.node.port));
    info!(%addr, "store server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, cfgrid_state::server::router(store))
        .with_graceful_shutdown(wait_for_ctrl_c())
        .await?;

    info!("store server stopped");
    Ok(())
}

/// Connect to the owning replica, or open the database and become it.
fn open_store(config: &CfgridConfig) -> anyhow::Result<StateStore> {
    if let Some(owner) = &config.store.remote {
        return Ok(StateStore::connect(owner.as_str()));
    }
    if let Some(parent) = config.store.path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = StateStore::open(&config.store.path)?;
    info!(path = ?config.store.path, "shared store opened");
    Ok(store)
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
    }
    info!("shutdown signal received");
}

/// Check out the default reference, if any, and return the status to
/// report.
async fn load_initial(
    config: &CfgridConfig,
    source: &dyn VersionSource,
    snapshots: &ConfigStore,
) -> LocalStatus {
    let Some(reference) = config.repository.default_ref.as_deref() else {
        info!("no default reference, waiting for a rollout");
        return LocalStatus::new(Color::Green, "");
    };

    let update = snapshots.begin_update().await;
    match checkout_snapshot(source, reference).await {
        Ok(snapshot) => {
            let installed = update.install(snapshot);
            LocalStatus::new(Color::Green, installed.hash())
        }
        Err(e) => {
            error!(%reference, error = %e, "initial checkout failed");
            LocalStatus::new(Color::Red, "")
        }
    }
}
