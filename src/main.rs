use std::sync::Arc;

use tracing::info;

use chat_stream_server::agent::OllamaEngine;
use chat_stream_server::{build_router, shutdown_signal};
use chat_stream_server::config::{AppConfig, StorageBackend};
use chat_stream_server::db::{ConversationStore, JsonConversationStore, PgConversationStore};
use chat_stream_server::service::chat_service::ChatService;
use chat_stream_server::stream::SessionRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_stream_server=debug,tower_http=debug".into()),
        )
        .init();

    let config = AppConfig::from_env()?;

    // ── Storage ───────────────────────────────────────────────────────────────
    let store: Arc<dyn ConversationStore> = match &config.storage {
        StorageBackend::Postgres(url) => Arc::new(PgConversationStore::connect(url).await?),
        StorageBackend::JsonFile(path) => {
            info!("Using JSON conversation store at {}", path.display());
            Arc::new(JsonConversationStore::new(path.clone()))
        }
    };

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let engine = Arc::new(OllamaEngine::new(&config.ollama_base_url, config.generation.clone())?);
    info!(
        "Generation engine: model '{}' at {}",
        config.generation.model, config.ollama_base_url
    );
    let registry = Arc::new(SessionRegistry::new(config.session_retention));
    let chat_service = ChatService::new(
        store,
        engine,
        Arc::clone(&registry),
        config.session.clone(),
        config.relay,
    );

    // ── Listen ────────────────────────────────────────────────────────────────
    let app = build_router(chat_service);
    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(ctrl_c, registry))
        .await?;

    info!("Server stopped");
    Ok(())
}
