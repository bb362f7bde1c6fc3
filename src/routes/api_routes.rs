use axum::extract::{Path, State};
use axum::Json;
use tracing::info;

use crate::errors::AppError;
use crate::models::{
    AskRequest, AskResponse, Conversation, ConversationIdResponse, ConversationSummary,
    CreateConversationRequest, CreateConversationResponse, SendRequest, StartStreamRequest,
    StopStreamRequest, StopStreamResponse,
};
use crate::routes::extract::ApiJson;
use crate::service::chat_service::ChatService;

/// GET `/conversations` — most recently active first
pub async fn list_conversations_handler(
    State(svc): State<ChatService>,
) -> Result<Json<Vec<ConversationSummary>>, AppError> {
    Ok(Json(svc.get_conversations().await?))
}

/// GET `/conversation/{id}`
pub async fn get_conversation_handler(
    Path(id): Path<String>,
    State(svc): State<ChatService>,
) -> Result<Json<Conversation>, AppError> {
    Ok(Json(svc.get_conversation(&id).await?))
}

/// POST `/conversation` — body `{title?}`
pub async fn create_conversation_handler(
    State(svc): State<ChatService>,
    ApiJson(request): ApiJson<CreateConversationRequest>,
) -> Result<Json<CreateConversationResponse>, AppError> {
    let id = svc.create_conversation(request.title).await?;
    Ok(Json(CreateConversationResponse { id }))
}

/// POST `/send` — records a user message
pub async fn send_handler(
    State(svc): State<ChatService>,
    ApiJson(request): ApiJson<SendRequest>,
) -> Result<Json<ConversationIdResponse>, AppError> {
    let conv_id = svc.send(request).await?;
    Ok(Json(ConversationIdResponse { conv_id }))
}

/// POST `/start_stream` — returns as soon as the session is launched
pub async fn start_stream_handler(
    State(svc): State<ChatService>,
    ApiJson(request): ApiJson<StartStreamRequest>,
) -> Result<Json<ConversationIdResponse>, AppError> {
    let conv_id = svc.start_stream(request.conv_id).await?;
    info!(conversation_id = %conv_id, "Stream started");
    Ok(Json(ConversationIdResponse { conv_id }))
}

/// POST `/stop_stream`
pub async fn stop_stream_handler(
    State(svc): State<ChatService>,
    ApiJson(request): ApiJson<StopStreamRequest>,
) -> Result<Json<StopStreamResponse>, AppError> {
    let cancelled = svc.stop_stream(&request.conv_id);
    Ok(Json(StopStreamResponse { conv_id: request.conv_id, cancelled }))
}

/// POST `/ask` — single question, single complete answer
pub async fn ask_handler(
    State(svc): State<ChatService>,
    ApiJson(request): ApiJson<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let response = svc.ask(&request.message).await?;
    Ok(Json(AskResponse { response }))
}

/// GET `/health`
pub async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
