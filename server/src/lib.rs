//! Ferry Server - REST object server for offline-first clients.
//!
//! Serves typed objects under `/objects/{type}` with create, retrieve,
//! update and delete, matching what `ferry_engine::HttpRemoteClient` expects.

mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
mod routes;

pub use crate::config::Config;
pub use crate::db::{create_store, ObjectStore, Objects};

use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub objects: Objects,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            objects: create_store(),
            config: Arc::new(config),
        }
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
