//! REST endpoints for the chat assistant and conversation history.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::info;

use super::model::{ChatRequest, ChatResponse, Conversation, ConversationDetail};
use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, DatabaseError};

fn conversation_not_found(id: i64) -> ApiError {
    DatabaseError::NotFound {
        entity: "Conversation".to_string(),
        id: id.to_string(),
    }
    .into()
}

/// POST /api/{user_id}/chat
async fn chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(user_id): Path<i64>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.user_id != user_id {
        return Err(ApiError::BadRequest(
            "User ID in path does not match user ID in request body".to_string(),
        ));
    }
    if user.id != user_id {
        return Err(ApiError::Forbidden(
            "Not authorized to chat as this user".to_string(),
        ));
    }
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("Message must not be empty".to_string()));
    }

    let response = state.chat.chat(&req).await?;
    info!(
        user_id,
        conversation_id = response.conversation_id,
        success = response.success,
        tool_calls = response.tool_calls_executed.len(),
        "Chat turn handled"
    );
    Ok(Json(response))
}

/// GET /api/v1/conversations
async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    Ok(Json(state.db.list_conversations(user.id).await?))
}

/// GET /api/v1/conversations/{id}
async fn get_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<ConversationDetail>, ApiError> {
    let conversation = state
        .db
        .get_conversation(user.id, id)
        .await?
        .ok_or_else(|| conversation_not_found(id))?;
    let messages = state.db.list_messages(conversation.id).await?;
    Ok(Json(ConversationDetail {
        conversation,
        messages,
    }))
}

/// DELETE /api/v1/conversations/{id}
async fn delete_conversation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if !state.db.delete_conversation(user.id, id).await? {
        return Err(conversation_not_found(id));
    }
    info!(conversation_id = id, user_id = user.id, "Conversation deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub fn chat_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/{user_id}/chat", post(chat))
        .route("/api/v1/conversations", get(list_conversations))
        .route(
            "/api/v1/conversations/{id}",
            get(get_conversation).delete(delete_conversation),
        )
        .with_state(state)
}
