//! Subsystem wiring and background tasks for `routerhostd serve`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use routerhost_core::RouterHostConfig;
use routerhost_liveness::{
    BoxFuture, LivenessCallback, LivenessMonitor, LivenessReport, LivenessTracker, probe_from_config,
};
use routerhost_scheduler::{
    AgentEvent, BacklogManager, BindingManager, ChannelNotifier, DriverRegistry, HostingDeviceManager,
    RouterService, SchedulerRegistry,
};
use routerhost_state::{HostingDeviceInfo, RouterId, StateStore};

pub async fn run(config: RouterHostConfig) -> anyhow::Result<()> {
    info!("routerhost daemon starting");

    std::fs::create_dir_all(&config.server.data_dir)
        .with_context(|| format!("failed to create {}", config.server.data_dir.display()))?;
    let db_path = config.server.data_dir.join("routerhost.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let (devices, pool_jobs) = HostingDeviceManager::new(
        store,
        Arc::new(DriverRegistry::with_defaults()),
        config.default_booting_time()?.as_secs(),
    );
    let registry = Arc::new(SchedulerRegistry::with_defaults(config.equivalence_window()?.as_secs()));
    let (notifier, agent_events) = ChannelNotifier::new();
    let bindings = Arc::new(BindingManager::new(
        devices.clone(),
        registry.clone(),
        Arc::new(BacklogManager::new()),
        Arc::new(notifier),
        &config.scheduling.namespace_router_type_name,
    ));
    let service = Arc::new(RouterService::new(bindings.clone(), &config.scheduling));

    service.ensure_namespace_router_type()?;
    registry.validate(&service.list_router_types()?)?;
    let backlogged = bindings.sync_router_backlog().await?;
    info!(backlogged, "router backlog resynced");

    let tracker = Arc::new(LivenessTracker::new(
        probe_from_config(&config)?,
        config.hosting_device_dead_timeout()?.as_secs(),
    ));
    let monitor = LivenessMonitor::new(tracker.clone(), config.liveness_check_interval()?)
        .with_callback(liveness_callback(service.clone()));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let sweeper_handle = tokio::spawn(
        bindings
            .clone()
            .run_backlog_sweeper(config.backlog_processing_interval()?, shutdown_rx.clone()),
    );
    let pool_handle = tokio::spawn(devices.run_pool_maintainer(pool_jobs, shutdown_rx.clone()));
    let liveness_handle = tokio::spawn(monitor.run(shutdown_rx.clone()));
    let events_handle = tokio::spawn(consume_agent_events(agent_events, tracker, shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let router = routerhost_api::build_router(service);
    let addr: SocketAddr = config
        .server
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", config.server.listen))?;
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = sweeper_handle.await;
    let _ = pool_handle.await;
    let _ = liveness_handle.await;
    let _ = events_handle.await;

    info!("routerhost daemon stopped");
    Ok(())
}

/// Dead devices have their routers evacuated; recovered devices get
/// their routers pushed to agents again.
fn liveness_callback(service: Arc<RouterService>) -> LivenessCallback {
    Arc::new(move |report: LivenessReport| -> BoxFuture {
        let service = service.clone();
        Box::pin(async move {
            if !report.dead.is_empty() {
                match service
                    .bindings()
                    .handle_non_responding_hosting_devices(&report.dead)
                    .await
                {
                    Ok(affected) => info!(devices = affected.len(), "dead hosting devices handled"),
                    Err(e) => warn!(error = %e, "failed to handle dead hosting devices"),
                }
            }

            let router_ids: Vec<RouterId> = report
                .reachable
                .iter()
                .filter_map(|id| report.routers.get(id))
                .flatten()
                .cloned()
                .collect();
            if router_ids.is_empty() {
                return;
            }
            match service.get_sync_data_ext(Some(router_ids.as_slice())).await {
                Ok(views) => {
                    service
                        .bindings()
                        .notifier()
                        .routers_updated(views, Some("hosting_device_reachable"))
                        .await
                }
                Err(e) => warn!(error = %e, "failed to resync routers of recovered devices"),
            }
        })
    })
}

/// Drain agent notifications. Every router handed to agents has its
/// hosting device checked, which is how unreachable devices enter the
/// liveness backlog.
async fn consume_agent_events(
    mut events: mpsc::UnboundedReceiver<AgentEvent>,
    tracker: Arc<LivenessTracker>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(json) => debug!(event = %json, "agent notification"),
                    Err(e) => warn!(error = %e, "unserializable agent notification"),
                }
                if let AgentEvent::RoutersUpdated { routers, .. } = event {
                    let mut hosted: BTreeMap<String, (HostingDeviceInfo, Vec<RouterId>)> = BTreeMap::new();
                    for view in routers {
                        if let Some(device) = view.hosting_device {
                            hosted
                                .entry(device.id.clone())
                                .or_insert_with(|| (device, Vec::new()))
                                .1
                                .push(view.router.id);
                        }
                    }
                    for (device, router_ids) in hosted.values() {
                        for router_id in router_ids {
                            if tracker.is_hosting_device_reachable(device, Some(router_id.as_str())).await {
                                break;
                            }
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("agent notification consumer shutting down");
                break;
            }
        }
    }
}
