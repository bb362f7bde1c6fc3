pub mod agent;
pub mod config;
pub mod db;
pub mod errors;
pub mod filter;
pub mod models;
pub mod routes;
pub mod service;
pub mod stream;

use std::future::Future;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::routes::api_routes::{
    ask_handler, create_conversation_handler, get_conversation_handler, health_handler,
    list_conversations_handler, send_handler, start_stream_handler, stop_stream_handler,
};
use crate::routes::events::events_handler;
use crate::service::chat_service::ChatService;
use crate::stream::SessionRegistry;

pub fn build_router(svc: ChatService) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/conversations", get(list_conversations_handler))
        .route("/conversation", post(create_conversation_handler))
        .route("/conversation/{id}", get(get_conversation_handler))
        .route("/send", post(send_handler))
        .route("/start_stream", post(start_stream_handler))
        .route("/stop_stream", post(stop_stream_handler))
        .route("/events/{conv_id}", get(events_handler))
        .route("/ask", post(ask_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(svc)
}

/// Resolves once `signal` fires and every session has been cancelled and
/// joined. Used as the graceful-shutdown future of `axum::serve`, so open
/// event streams receive their terminal event and close.
pub async fn shutdown_signal(signal: impl Future<Output = ()>, registry: Arc<SessionRegistry>) {
    signal.await;
    tracing::info!("Shutdown requested, stopping {} stream(s)", registry.len());
    registry.shutdown().await;
}
