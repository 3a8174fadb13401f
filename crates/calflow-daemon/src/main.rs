//! Calendar extraction session daemon.
//!
//! Owns the session engine and exposes it to UI surfaces over the
//! WebSocket bridge at `/ws`. All writes flow through this process; the
//! surfaces only send intents.

use std::{sync::Arc, time::Duration};

use axum::Router;
use calflow_bridge::create_bridge_router;
use calflow_core::{CredentialCell, ExtractionBackend, KeyValueStore};
use calflow_remote::HttpBackend;
use calflow_session::{
    BackendSync, GuestSessions, LogNotifier, SessionManager, SessionPoller, SessionStore,
    storage::FileStore,
};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::Config;

/// How often expired guest records are swept.
const GUEST_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        backend = %config.backend_url,
        data_dir = %config.data_dir.display(),
        "starting calflow daemon"
    );

    let storage: Arc<dyn KeyValueStore> = Arc::new(FileStore::open(&config.data_dir).await?);
    let backend: Arc<dyn ExtractionBackend> = Arc::new(HttpBackend::new(&config.backend_url));
    let credentials = Arc::new(CredentialCell::new());

    let store = Arc::new(SessionStore::new(storage.clone(), config.cache_capacity));
    let sync = BackendSync::new(backend.clone(), credentials.clone(), storage.clone());
    store.set_sync_hook(Arc::new(sync.clone()));

    let poller = SessionPoller::new(
        store.clone(),
        backend.clone(),
        credentials.clone(),
        Arc::new(LogNotifier),
        config.poll,
    );
    let guest = GuestSessions::new(backend.clone(), storage.clone());
    let manager = SessionManager::new(store, backend, credentials, poller, guest.clone(), storage);

    sync.load().await;
    manager.start().await;
    let _cleanup = guest.spawn_cleanup_task(GUEST_CLEANUP_INTERVAL);

    // Build router
    let app = Router::new()
        .merge(create_bridge_router(manager))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("bridge listening on ws://{}/ws", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
