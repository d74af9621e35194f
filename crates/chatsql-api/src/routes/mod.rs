//! Route table assembly, grounded on the teacher's `web_server::build_routes`
//! style of composing one `Router`/filter tree out of per-resource modules.

pub mod chat;
pub mod conversations;
pub mod feedback;
pub mod health;
pub mod knowledge;
pub mod memory;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat/stream", post(chat::chat_stream))
        .route(
            "/conversations",
            get(conversations::list_conversations),
        )
        .route(
            "/conversations/:id",
            get(conversations::get_conversation).delete(conversations::delete_conversation),
        )
        .route("/feedback/:conversation_id/vote", post(feedback::vote))
        .route("/feedback/:conversation_id/rate", post(feedback::rate))
        .route("/feedback/:conversation_id", get(feedback::get_feedback))
        .route(
            "/knowledge/time-rules",
            get(knowledge::list_time_rules).post(knowledge::upsert_time_rule),
        )
        .route(
            "/knowledge/business-terms",
            get(knowledge::list_business_terms).post(knowledge::upsert_business_term),
        )
        .route(
            "/knowledge/field-mappings",
            get(knowledge::list_field_mappings).post(knowledge::upsert_field_mapping),
        )
        .route(
            "/knowledge/prompts/:name",
            get(knowledge::get_prompt),
        )
        .route("/knowledge/prompts", post(knowledge::put_prompt))
        .route("/knowledge/prompts/activate", post(knowledge::activate_prompt))
        .route("/memory/stats", get(memory::stats))
        .route("/memory/tools", get(memory::tools))
        .route("/memory/texts", get(memory::texts))
        .route("/memory/rag-high-score", get(memory::rag_high_score))
        .route("/healthz", get(health::healthz))
        .route("/metrics", get(health::metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
