use std::sync::Arc;

use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use access_sync::api::{self, AppState};
use access_sync::config::Config;
use access_sync::db;
use access_sync::device::{CardDirectory, DeviceLink, SwipeLogReader};
use access_sync::jobs::{PgSwipeStore, SwipeArchiver};
use access_sync::keycloak::Keycloak;
use access_sync::sync::{post_periodically, IdentityProvider, SyncController};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "access_sync=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting access controller sync...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(device = %config.access_control_host, "Configuration loaded successfully");

    let link = Arc::new(DeviceLink::new(
        config.access_control_host.clone(),
        config.access_control_timeout,
    ));
    let cards = Arc::new(CardDirectory::new(link.clone()));
    let keycloak: Option<Arc<dyn IdentityProvider>> = Keycloak::from_config(&config)
        .map(|keycloak| Arc::new(keycloak) as Arc<dyn IdentityProvider>);

    let shutdown = CancellationToken::new();
    let tasks = TaskTracker::new();

    // Liveness probe
    let probe = tokio::net::TcpListener::bind(&config.probe_addr).await?;
    tasks.spawn(serve_until(probe, api::health::router(), shutdown.clone()));

    match &keycloak {
        Some(users) => {
            let controller = SyncController::new(cards.clone(), users.clone());

            if let Some(callback_url) = &config.callback_url {
                if let Err(e) = controller.ensure_webhook(callback_url).await {
                    tracing::error!(error = %e, "Failed to register Keycloak webhook");
                }
            }

            tasks.spawn(post_periodically(
                controller.trigger(),
                config.resync_interval,
                shutdown.clone(),
            ));

            if let Some(addr) = &config.webhook_addr {
                let listener = tokio::net::TcpListener::bind(addr).await?;
                let app = api::router(AppState {
                    cards: cards.clone(),
                    trigger: controller.trigger(),
                });
                tasks.spawn(serve_until(listener, app, shutdown.clone()));
            }

            tasks.spawn(controller.run(shutdown.clone()));
        }
        None => tracing::warn!("KEYCLOAK_URL not set, card sync disabled"),
    }

    match config.postgres_options() {
        Some(options) => {
            let pool = db::create_pool(options).await?;
            tracing::info!("Database pool created");

            db::run_migrations(&pool).await?;
            tracing::info!("Database migrations completed");

            let archiver = SwipeArchiver::new(
                Arc::new(SwipeLogReader::new(link.clone())),
                Arc::new(PgSwipeStore::new(pool)),
                keycloak.clone(),
                config.swipe_scrape_interval,
            );
            tasks.spawn(archiver.run(shutdown.clone()));
        }
        None => tracing::warn!("POSTGRES_HOST not set, swipe archiver disabled"),
    }
    tasks.close();

    shutdown_signal().await;
    shutdown.cancel();
    tasks.wait().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn serve_until(listener: tokio::net::TcpListener, app: axum::Router, shutdown: CancellationToken) {
    if let Err(e) = api::serve(listener, app, shutdown.cancelled_owned()).await {
        tracing::error!(error = %e, "HTTP server failed");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received, cleaning up...");
}
