mod auth;
mod config;
mod error;
mod presence;
mod routes;
mod ws;

use std::sync::Arc;

use config::AppConfig;
use presence::PresenceRegistry;
use quill_core::{Engine, OwnerOnlyAccess};
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quill_server=info".parse().expect("valid directive"))
                .add_directive("quill_core=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting quill-server with config: {:?}", config);

    // The sharing layer supplies the real access resolver; standalone
    // deployments scope everything to the note owner.
    let engine = Engine::open(
        &config.db_path,
        config.engine_config(),
        Arc::new(OwnerOnlyAccess),
    )
    .await?;

    let registry = Arc::new(PresenceRegistry::new(
        engine.clone(),
        config.inactivity_timeout,
    ));
    registry.restore().await?;

    spawn_event_pump(&engine, Arc::clone(&registry));
    spawn_sweeper(Arc::clone(&registry), config.ping_interval);

    let state = AppState::new(Arc::clone(&config), engine, registry);
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("quill-server listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}

/// Forward engine events (sync promotions, detections, resolutions) to the
/// connected devices
fn spawn_event_pump(engine: &Engine, registry: Arc<PresenceRegistry>) {
    let mut events = engine.events.subscribe_all();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(error) = registry.broadcast_event(&event).await {
                        tracing::warn!(%error, "Failed to broadcast engine event");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event pump lagged behind the bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Ping live channels and close the ones idle past the threshold
fn spawn_sweeper(registry: Arc<PresenceRegistry>, ping_interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(error) = registry.sweep_inactive().await {
                tracing::warn!(%error, "Presence sweep failed");
            }
        }
    });
}
