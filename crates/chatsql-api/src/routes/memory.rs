//! Memory introspection (spec §6): read-only windows onto what the
//! system has learned, for operators auditing the RAG store rather than
//! for the conversational flow itself.
//!
//! "Texts" are the curated natural-language knowledge facts (time
//! rules, business terms, field mappings); "tools" are past executed
//! `(question, sql)` pairs the system has learned to reuse. Both are
//! read-only views over `KnowledgeStore`; nothing here mutates state.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct HighScoreQuery {
    pub limit: Option<usize>,
    pub min_score: Option<f64>,
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let time_rules = state.knowledge.list_time_rules().await?;
    let business_terms = state.knowledge.list_business_terms().await?;
    let field_mappings = state.knowledge.list_field_mappings().await?;
    let qa_pairs = state.knowledge.high_score_qa_pairs(0.0, usize::MAX).await?;
    let evictable = state.knowledge.evictable_qa_pairs().await?;

    Ok(Json(json!({
        "timeRules": time_rules.len(),
        "businessTerms": business_terms.len(),
        "fieldMappings": field_mappings.len(),
        "qaPairs": qa_pairs.len(),
        "evictableQaPairs": evictable.len(),
    })))
}

pub async fn tools(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> ApiResult<Json<Value>> {
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT);
    let pairs = state.knowledge.high_score_qa_pairs(0.0, limit).await?;
    let tools = pairs
        .into_iter()
        .map(|p| json!({ "question": p.question, "sql": p.sql, "usageCount": p.usage_count }))
        .collect::<Vec<_>>();
    Ok(Json(json!({ "tools": tools })))
}

pub async fn texts(State(state): State<AppState>, Query(q): Query<LimitQuery>) -> ApiResult<Json<Value>> {
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT);

    let mut texts: Vec<Value> = Vec::new();
    for rule in state.knowledge.list_time_rules().await? {
        texts.push(json!({ "kind": "time_rule", "keyword": rule.keyword, "text": rule.canonical_range }));
    }
    for term in state.knowledge.list_business_terms().await? {
        texts.push(json!({ "kind": "business_term", "keyword": term.keyword, "text": term.description }));
    }
    for mapping in state.knowledge.list_field_mappings().await? {
        texts.push(json!({ "kind": "field_mapping", "keyword": mapping.keyword, "text": mapping.canonical_field }));
    }
    texts.truncate(limit);

    Ok(Json(json!({ "texts": texts })))
}

pub async fn rag_high_score(State(state): State<AppState>, Query(q): Query<HighScoreQuery>) -> ApiResult<Json<Value>> {
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT);
    let min_score = q.min_score.unwrap_or(4.0);
    let pairs = state.knowledge.high_score_qa_pairs(min_score, limit).await?;
    Ok(Json(json!({ "pairs": pairs })))
}
