use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use openslot_core::tracing::{TracingConfig, init_tracing};
use openslot_server::{
    AppInner, AppState, BusyConfigStore, EventCache, ServerConfig, StateStore, SyncScheduler,
    providers_from_config, router,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(TracingConfig::service())?;

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("OPENSLOT_CONFIG").ok())
        .map(PathBuf::from);
    let config = ServerConfig::load_or_default(config_path.as_deref());

    let state_dir = config.resolved_state_dir();
    let store = Arc::new(StateStore::open(state_dir.join("state.json")));
    let busy = Arc::new(BusyConfigStore::new(state_dir.join("busy.json")));
    let cache = Arc::new(Mutex::new(EventCache::new(
        config.cache_ttl(),
        config.stale_grace(),
    )));

    let providers = providers_from_config(&config);
    if providers.is_empty() {
        info!("no providers configured, serving internal meetings only");
    }

    let scheduler = SyncScheduler::new(
        config.sync_config(),
        providers.clone(),
        store.clone(),
        cache.clone(),
        busy.clone(),
    )
    .await;
    let sync_handle = scheduler.handle();
    tokio::spawn(scheduler.run());

    let state = AppState::new(AppInner {
        business_offset: config.business_offset(),
        business_hours: config.hours(),
        providers,
        cache,
        busy,
        store,
        sync: sync_handle,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = router(state).layer(cors);

    info!(addr = %config.bind_addr, "openslot-server listening");
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
