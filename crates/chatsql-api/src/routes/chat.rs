//! `POST /chat/stream` (spec §6): the single streaming entry point.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use chatsql_types::event::DONE_SENTINEL;
use chatsql_types::model::UserGroup;
use futures::stream::Stream;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::orchestrator::{self, TurnRequest};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatStreamRequest {
    pub message: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: Option<Uuid>,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "userNickname")]
    pub user_nickname: Option<String>,
}

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatStreamRequest>,
) -> ApiResult<impl IntoResponse> {
    if request.message.trim().is_empty() {
        return Err(ApiError(chatsql_types::ChatSqlError::Validation(
            "message must not be empty".to_string(),
        )));
    }

    let group = resolve_group(&state, &request.user_id).await?;
    if !state.rate_limiter.allow(&request.user_id, group) {
        return Err(ApiError(chatsql_types::ChatSqlError::Permission(
            "rate limit exceeded".to_string(),
        )));
    }

    let (tx, rx) = tokio::sync::mpsc::channel(state.config.agent.event_buffer_size);
    let state_for_task = state.clone();
    let turn = TurnRequest {
        conversation_id: request.conversation_id,
        user_id: request.user_id.clone(),
        message: request.message.clone(),
    };

    tokio::spawn(async move {
        match orchestrator::run_turn(&state_for_task, turn, tx.clone()).await {
            Ok(aborted) => {
                if !aborted {
                    let _ = tx.send(chatsql_types::event::StreamEvent::error("__done__", "")).await;
                }
            }
            Err(e) => {
                let _ = tx
                    .send(chatsql_types::event::StreamEvent::error("internal", e.to_string()))
                    .await;
                let _ = tx.send(chatsql_types::event::StreamEvent::error("__done__", "")).await;
            }
        }
    });

    let stream = event_stream(rx);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn resolve_group(state: &AppState, user_id: &str) -> ApiResult<UserGroup> {
    Ok(state
        .knowledge
        .get_user_profile(user_id)
        .await
        .map_err(ApiError)?
        .map(|p| p.group)
        .unwrap_or(UserGroup::Guest))
}

/// Adapts the orchestrator's event channel into an SSE byte stream,
/// translating the internal `__done__` sentinel event into the wire
/// `[DONE]` terminator (spec §6) rather than serializing it as JSON.
/// `done` once emitted ends the stream; everything after is dropped.
fn event_stream(
    rx: tokio::sync::mpsc::Receiver<chatsql_types::event::StreamEvent>,
) -> impl Stream<Item = std::result::Result<Event, std::convert::Infallible>> {
    futures::stream::unfold((rx, false), |(mut rx, done)| async move {
        if done {
            return None;
        }
        let event = rx.recv().await?;
        if is_done_sentinel(&event) {
            return Some((Ok(Event::default().data(DONE_SENTINEL)), (rx, true)));
        }
        match serde_json::to_string(&event) {
            Ok(json) => Some((Ok(Event::default().data(json)), (rx, false))),
            Err(_) => Some((Ok(Event::default().data("")), (rx, false))),
        }
    })
}

fn is_done_sentinel(event: &chatsql_types::event::StreamEvent) -> bool {
    matches!(
        &event.rich,
        Some(chatsql_types::event::RichPayload::Error { kind, .. }) if kind == "__done__"
    )
}
