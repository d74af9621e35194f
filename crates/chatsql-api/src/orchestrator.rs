//! Stream Orchestrator (C7).
//!
//! Drives one request end to end: loads or creates the conversation,
//! runs the analyzer / few-shot selector / prompt composer, hands the
//! agent loop a bounded event channel, and persists the turn afterward.
//! Grounded on SPEC_FULL §9 "Async producer/consumer → explicit
//! channels": the agent loop is the single writer, the SSE response body
//! is the single reader, and analyzer/fewshot progress is folded in
//! before the agent loop ever starts rather than merged concurrently,
//! since this system's per-request suspension points are sequential
//! (analyze, then select exemplars, then compose, then run).

use chatsql_core::LlmMessage;
use chatsql_types::event::StreamEvent;
use chatsql_types::model::{
    Conversation, Message, MessageExtra, MessageRole, QueryHistory, TokenType, UserProfile,
};
use chatsql_types::{ChatSqlError, Result};
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use chatsql_cognitive::analyzer::UserContext;

use crate::state::AppState;

pub struct TurnRequest {
    pub conversation_id: Option<Uuid>,
    pub user_id: String,
    pub message: String,
}

/// Runs one turn, streaming every event it produces on `events`. The
/// `conversationId` event is always sent first; the caller is
/// responsible for the `[DONE]` sentinel once this returns, unless the
/// returned flag says the loop was aborted by a disconnect.
pub async fn run_turn(state: &AppState, request: TurnRequest, events: Sender<StreamEvent>) -> Result<bool> {
    let conversation = load_or_create_conversation(state, request.conversation_id, &request.user_id).await?;
    let _ = events.send(StreamEvent::conversation_id(conversation.id)).await;

    let transcript = state.conversations.load_transcript(conversation.id).await?;
    let last_turn_question = transcript
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .map(|m| m.text.clone());

    let profile = state
        .knowledge
        .get_user_profile(&request.user_id)
        .await?
        .unwrap_or_else(|| UserProfile::new_default(&request.user_id));

    let user_message = Message::new(conversation.id, MessageRole::User, request.message.clone());
    state.conversations.persist_message(user_message.clone()).await?;

    let ctx = UserContext {
        user_id: request.user_id.clone(),
        last_turn_question,
        focus_dimensions: profile.focus_dimensions.clone(),
    };
    let analysis = state.analyzer.analyze(&request.message, &ctx).await?;

    let fewshot = state
        .fewshot
        .select(
            &request.message,
            &request.user_id,
            Some(state.config.agent.exemplar_limit),
            true,
        )
        .await?;

    let system_prompt = state.prompt.compose(&profile, &analysis, &fewshot.exemplars).await?;

    let llm_history = transcript.iter().map(to_llm_message).collect::<Vec<_>>();
    let assistant_message_id = Uuid::new_v4();

    let run_result = state
        .agent
        .run(
            assistant_message_id,
            system_prompt,
            &request.message,
            llm_history,
            profile.group,
            &events,
        )
        .await?;

    let sql_rejected = run_result
        .tool_calls
        .iter()
        .any(|t| t.tool_name == "run_sql" && !t.success);

    let mut debug = fewshot
        .debug
        .map(chatsql_types::model::MessageDebugInfo::from)
        .unwrap_or_default();
    debug.sql_rejected = sql_rejected;
    debug.aborted = run_result.aborted;
    debug.exemplar_previews = fewshot
        .exemplars
        .iter()
        .map(|e| e.question.clone())
        .collect();

    let mut assistant_message = Message {
        id: assistant_message_id,
        ..Message::new(conversation.id, MessageRole::Assistant, run_result.final_text.clone())
    };
    assistant_message.extra = MessageExtra {
        sql: run_result.sql.clone(),
        result_file_hash: run_result.result_file_hash.clone(),
        chart: run_result.chart.clone(),
        reasoning_steps: run_result.reasoning_steps.clone(),
        semantic_tokens: analysis.semantic_tokens.clone(),
        selected_tables: analysis.candidate_tables.clone(),
        knowledge_used: analysis.relevant_knowledge.clone(),
        debug: Some(debug),
    };
    state.conversations.persist_message(assistant_message).await?;

    let history_entry = QueryHistory {
        id: Uuid::new_v4(),
        user_id: request.user_id.clone(),
        raw_text: request.message.clone(),
        rewritten_text: analysis.rewritten_question.clone(),
        detected_type: None,
        chart_type: run_result.chart.as_ref().map(|c| c.chart_type),
        dimensions: tokens_of_type(&analysis.semantic_tokens, TokenType::Dimension),
        metrics: tokens_of_type(&analysis.semantic_tokens, TokenType::Metric),
        time_range: tokens_of_type(&analysis.semantic_tokens, TokenType::TimeRule).into_iter().next(),
        created_at: chrono::Utc::now(),
    };
    state.knowledge.append_query_history(history_entry).await?;
    state.profile_learner.update_profile(&request.user_id).await?;

    metrics::counter!("chatsql_turns_total").increment(1);
    if run_result.aborted {
        metrics::counter!("chatsql_turns_aborted_total").increment(1);
    }
    if sql_rejected {
        metrics::counter!("chatsql_sql_rejected_total").increment(1);
    }

    Ok(run_result.aborted)
}

async fn load_or_create_conversation(state: &AppState, conversation_id: Option<Uuid>, user_id: &str) -> Result<Conversation> {
    if let Some(id) = conversation_id {
        return state
            .conversations
            .get_conversation(id)
            .await?
            .ok_or_else(|| ChatSqlError::NotFound(format!("conversation {id}")));
    }

    let conversation = Conversation::new(user_id, "api");
    state.conversations.create_conversation(conversation.clone()).await?;
    Ok(conversation)
}

fn tokens_of_type(tokens: &[chatsql_types::model::SemanticToken], kind: TokenType) -> Vec<String> {
    tokens
        .iter()
        .filter(|t| t.token_type == kind)
        .map(|t| t.text.clone())
        .collect()
}

fn to_llm_message(message: &Message) -> LlmMessage {
    let role = match message.role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    };
    LlmMessage {
        role: role.to_string(),
        content: message.text.clone(),
        tool_calls: Vec::new(),
        tool_call_id: None,
    }
}
