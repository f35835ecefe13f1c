use std::sync::Arc;

use roomcast::{config::Config, hub::Hub, store::SqliteStore, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let store = SqliteStore::connect(&config.database_url, config.db_max_connections).await?;
    tracing::info!(database_url = %config.database_url, "Connected to message store");

    let hub = Hub::new(config.hub.clone(), Arc::new(store));
    let sweeper = hub.registry().spawn_sweeper();

    let app = roomcast::router(AppState {
        hub,
        write_timeout: config.write_timeout,
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Listening");
    axum::serve(listener, app).await?;

    sweeper.abort();
    Ok(())
}
