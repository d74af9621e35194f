//! Conversation API (spec §6): list, fetch-with-transcript, delete.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "userId")]
    pub user_id: String,
}

pub async fn list_conversations(State(state): State<AppState>, Query(q): Query<ListQuery>) -> ApiResult<Json<Value>> {
    let conversations = state.conversations.list_conversations(&q.user_id).await?;
    Ok(Json(json!({ "conversations": conversations })))
}

pub async fn get_conversation(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let conversation = state
        .conversations
        .get_conversation(id)
        .await?
        .ok_or_else(|| chatsql_types::ChatSqlError::NotFound(format!("conversation {id}")))?;
    let messages = state.conversations.load_transcript(id).await?;
    Ok(Json(json!({ "conversation": conversation, "messages": messages })))
}

pub async fn delete_conversation(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Value>> {
    state.conversations.delete_conversation(id).await?;
    Ok(Json(json!({ "deleted": true })))
}
