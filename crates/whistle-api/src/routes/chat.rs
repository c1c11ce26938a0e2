use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use whistle_core::{directory, message, AppState};
use whistle_models::message::{ConversationSummary, Message, NewMessage};
use whistle_util::pagination::HistoryParams;

use crate::error::ApiError;

pub async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<NewMessage>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let Json(new) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let stored = message::send_message(&state.delivery, &new, None).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Json<Message>, ApiError> {
    let stored = message::get_message(&state.store, &message_id).await?;
    Ok(Json(stored))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let summaries = directory::list_conversations(&state.store, &user_id).await?;
    Ok(Json(summaries))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let Query(params) = params
        .map_err(|_| ApiError::BadRequest("limit must be a non-negative integer".into()))?;
    let messages = directory::list_messages(
        &state.store,
        &state.config.history,
        &conversation_id,
        params.limit,
    )
    .await?;
    Ok(Json(messages))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let updated = message::mark_read(&state.store, &conversation_id).await?;
    Ok(Json(json!({
        "conversationId": conversation_id,
        "updated": updated,
    })))
}

pub async fn burn_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = message::burn_conversation(&state.store, &conversation_id).await?;
    Ok(Json(json!({
        "message": "Conversation deleted",
        "conversationId": conversation_id,
        "deleted": deleted,
    })))
}
