//! Feedback API (spec §4.6, §6). Write-through: every vote or rating
//! updates the singleton current-feedback row, appends to history, and
//! notifies the RAG Learner with the turn's question/SQL/ratings.

use axum::extract::{Path, State};
use axum::Json;
use chatsql_types::model::{Feedback, MessageRole, UserVote};
use chatsql_types::ChatSqlError;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub vote: UserVote,
}

#[derive(Debug, Deserialize)]
pub struct RateRequest {
    pub rating: u8,
    pub reviewer: Reviewer,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Reviewer {
    Expert,
    Llm,
}

pub async fn vote(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<VoteRequest>,
) -> ApiResult<Json<Value>> {
    let mut feedback = current_or_new(&state, conversation_id).await?;
    feedback.user_vote = Some(body.vote);
    feedback.timestamp = chrono::Utc::now();
    apply_feedback(&state, feedback).await
}

pub async fn rate(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<RateRequest>,
) -> ApiResult<Json<Value>> {
    if !(1..=5).contains(&body.rating) {
        return Err(chatsql_types::ChatSqlError::Validation("rating must be 1..=5".to_string()).into());
    }
    let mut feedback = current_or_new(&state, conversation_id).await?;
    match body.reviewer {
        Reviewer::Expert => feedback.expert_rating = Some(body.rating),
        Reviewer::Llm => feedback.llm_score = Some(body.rating),
    }
    feedback.timestamp = chrono::Utc::now();
    apply_feedback(&state, feedback).await
}

pub async fn get_feedback(State(state): State<AppState>, Path(conversation_id): Path<Uuid>) -> ApiResult<Json<Value>> {
    let current = state.conversations.current_feedback(conversation_id).await?;
    let history = state.conversations.feedback_history(conversation_id).await?;
    Ok(Json(json!({ "current": current, "history": history })))
}

async fn current_or_new(state: &AppState, conversation_id: Uuid) -> ApiResult<Feedback> {
    Ok(state
        .conversations
        .current_feedback(conversation_id)
        .await?
        .unwrap_or_else(|| Feedback {
            conversation_id,
            expert_rating: None,
            user_vote: None,
            llm_score: None,
            timestamp: chrono::Utc::now(),
        }))
}

async fn apply_feedback(state: &AppState, feedback: Feedback) -> ApiResult<Json<Value>> {
    state.conversations.rate(feedback.clone()).await?;

    if let Some((question, sql, answer_preview)) = turn_context(state, feedback.conversation_id).await? {
        let action = state
            .learner
            .learn(&question, &sql, answer_preview.as_deref(), &feedback)
            .await?;
        tracing::info!(conversation_id = %feedback.conversation_id, ?action, "rag learner notified");
    }

    Ok(Json(json!({ "feedback": feedback })))
}

/// Finds the most recent user question and the SQL/answer the assistant
/// produced in response, for handing to the RAG Learner. Returns `None`
/// when the assistant never ran a query (nothing worth learning from).
async fn turn_context(state: &AppState, conversation_id: Uuid) -> ApiResult<Option<(String, String, Option<String>)>> {
    let transcript = state.conversations.load_transcript(conversation_id).await?;

    let Some(assistant_index) = transcript.iter().rposition(|m| m.role == MessageRole::Assistant) else {
        return Ok(None);
    };
    let assistant = &transcript[assistant_index];
    let Some(sql) = assistant.extra.sql.clone() else {
        return Ok(None);
    };
    let question = transcript[..assistant_index]
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .map(|m| m.text.clone())
        .ok_or_else(|| ChatSqlError::Internal("assistant message has no preceding user question".to_string()))?;

    let answer_preview = if assistant.text.is_empty() { None } else { Some(assistant.text.clone()) };
    Ok(Some((question, sql, answer_preview)))
}
