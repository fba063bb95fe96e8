//! Expedientes synchronization core.
//!
//! An authoritative file-backed record store, a WebSocket broadcast channel,
//! a REST fallback, and the client-side reconciliation runtime.

pub mod api;
pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod status;
pub mod store;
pub mod sync;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use store::RecordStore;
use sync::SyncService;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RecordStore>,
    pub sync: Arc<SyncService>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<RecordStore>, config: Config) -> Self {
        let sync = Arc::new(SyncService::new(store.clone(), config.schema));
        Self {
            store,
            sync,
            config: Arc::new(config),
        }
    }
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/expedientes", get(api::list_expedientes))
        .route("/expedientes", post(api::replace_expedientes))
        .route("/expedientes/search", get(api::search_expedientes))
        .route("/status", get(api::get_status))
        .route("/report", get(api::get_report));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(sync::ws_handler))
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
