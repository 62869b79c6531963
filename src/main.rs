//! order-desk binary: keeps one dashboard's order book live and logs changes.

use std::error::Error;
use std::sync::Arc;

use order_desk::adapters::{PhoenixSettings, PhoenixTransport, PostgrestOrderFetcher, PostgrestSettings};
use order_desk::application::{
    ChannelSettings, DashboardReconciler, DashboardSettings, MetricsRefreshTrigger,
    SubscriptionRegistry,
};
use order_desk::config::AppConfig;
use order_desk::domain::foundation::BranchId;
use order_desk::domain::orders::ViewFilter;
use order_desk::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = AppConfig::load()?;
    config.validate()?;
    init_tracing(&config.logging)?;

    let branch = config
        .dashboard
        .branch
        .as_deref()
        .map(BranchId::new)
        .transpose()?;
    let mut view = ViewFilter::all();
    if let Some(branch) = &branch {
        view = view.for_branch(branch.clone());
    }
    if let Some(statuses) = config.dashboard.statuses_list() {
        view = view.with_statuses(statuses);
    }

    let transport = Arc::new(PhoenixTransport::new(PhoenixSettings::from_config(
        &config.backend,
        &config.realtime,
    )));
    let fetcher = Arc::new(PostgrestOrderFetcher::new(PostgrestSettings::from(&config))?);
    let registry = SubscriptionRegistry::new(transport, ChannelSettings::from(&config));

    let reconciler = DashboardReconciler::new(fetcher, DashboardSettings::from(&config), view);

    // Subscribe before the initial load so nothing committed in between is missed.
    let mut subscriptions = reconciler.attach(&registry).await?;
    let mut metrics_tables = vec![config.dashboard.orders_table.clone()];
    metrics_tables.extend(config.dashboard.line_item_tables_list());
    let metrics = MetricsRefreshTrigger::new(
        metrics_tables,
        branch.clone(),
        config.dashboard.metrics_quiet_window(),
        config.dashboard.metrics_max_wait(),
    );
    for subscriber in metrics.subscribers() {
        subscriptions.push(registry.subscribe(subscriber).await?);
    }

    let loaded = reconciler.reload().await?;
    tracing::info!(orders = loaded, branch = ?branch, "Initial order load complete");

    let mut revisions = reconciler.watch_revisions();
    let mut refreshes = metrics.watch();
    let mut status = registry.watch_status(branch.as_ref()).await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                let revision = *revisions.borrow_and_update();
                tracing::info!(revision, orders = reconciler.orders().await.len(), "Order book changed");
            }
            changed = refreshes.changed() => {
                if changed.is_err() {
                    break;
                }
                let refresh = refreshes.borrow_and_update().clone();
                tracing::info!(generation = refresh.generation, tables = ?refresh.tables, "Metrics should refresh");
            }
            changed = async {
                match status.as_mut() {
                    Some(rx) => rx.changed().await,
                    None => std::future::pending().await,
                }
            } => {
                let Some(rx) = status.as_mut() else { continue };
                if changed.is_err() {
                    status = None;
                    continue;
                }
                let snapshot = rx.borrow_and_update().clone();
                tracing::info!(
                    scope = %snapshot.scope,
                    state = ?snapshot.state,
                    badge = ?snapshot.badge(),
                    attempt = snapshot.attempt,
                    "Connection status"
                );
                if snapshot.gave_up {
                    tracing::warn!(error = ?reconciler.last_error().await, "Live updates stopped; reconnect to resume");
                }
            }
        }
    }

    for subscription in &subscriptions {
        subscription.unsubscribe().await;
    }
    metrics.shutdown().await;
    reconciler.shutdown().await;
    registry.shutdown().await;
    Ok(())
}
