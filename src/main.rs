use orgtree::http::{AppState, HttpServer};
use orgtree::{DocumentStore, OrgtreeConfig, RemoteStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let config_path = std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("ORGTREE_CONFIG"))
        .map(PathBuf::from);
    let config = OrgtreeConfig::load(config_path.as_deref())?;

    info!("Orgtree v{}", orgtree::version());
    info!(
        "Store {} ({} -> {})",
        config.store.url, config.source_index, config.target_index
    );

    let store: Arc<dyn DocumentStore> = Arc::new(RemoteStore::new(&config.store)?);
    if let Err(e) = store.ping().await {
        tracing::warn!("Store not reachable yet: {}", e);
    }

    let state = AppState::from_config(store, &config);
    HttpServer::new(state, config.http.address.clone(), config.http.port)
        .start()
        .await?;
    Ok(())
}
