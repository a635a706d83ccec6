//! HTTP and WebSocket host for Reef applications.

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod demo;
pub mod handlers;
pub mod telemetry;
pub mod websocket;

pub use handlers::ServerState;

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(websocket::websocket_handler))
        .route("/", get(handlers::index))
        .route("/*path", get(handlers::page))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
