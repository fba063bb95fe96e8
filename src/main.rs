//! Expedientes sync server.
//!
//! Serves the synchronization channel and the REST fallback over one port.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use expedientes_sync::config::Config;
use expedientes_sync::store::{JsonFilePersistence, RecordStore};
use expedientes_sync::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Expedientes sync server");
    tracing::info!("Data file: {:?}", config.data_file);
    tracing::info!("Record schema: {}", config.schema.as_str());
    tracing::info!("Bind address: {}", config.bind_addr);

    // Load the store from disk
    let store = Arc::new(RecordStore::open(JsonFilePersistence::new(&config.data_file)).await);

    let bind_addr = config.bind_addr;
    let state = AppState::new(store.clone(), config);
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down, writing final snapshot");
    store.flush().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
