//! Knowledge-base CRUD (spec §6): time rules, business terms, field
//! mappings, and prompt versions. Every upsert is keyed on the model's
//! own natural key; there is no separate create-vs-update distinction
//! at this layer, matching `KnowledgeStore`'s `upsert_*` contract.

use axum::extract::{Path, State};
use axum::Json;
use chatsql_types::model::{BusinessTerm, FieldMapping, PromptVersion, TimeRule};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list_time_rules(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let rules = state.knowledge.list_time_rules().await?;
    Ok(Json(json!({ "timeRules": rules })))
}

pub async fn upsert_time_rule(State(state): State<AppState>, Json(rule): Json<TimeRule>) -> ApiResult<Json<Value>> {
    state.knowledge.upsert_time_rule(rule.clone()).await?;
    Ok(Json(json!({ "timeRule": rule })))
}

pub async fn list_business_terms(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let terms = state.knowledge.list_business_terms().await?;
    Ok(Json(json!({ "businessTerms": terms })))
}

pub async fn upsert_business_term(
    State(state): State<AppState>,
    Json(term): Json<BusinessTerm>,
) -> ApiResult<Json<Value>> {
    state.knowledge.upsert_business_term(term.clone()).await?;
    Ok(Json(json!({ "businessTerm": term })))
}

pub async fn list_field_mappings(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let mappings = state.knowledge.list_field_mappings().await?;
    Ok(Json(json!({ "fieldMappings": mappings })))
}

pub async fn upsert_field_mapping(
    State(state): State<AppState>,
    Json(mapping): Json<FieldMapping>,
) -> ApiResult<Json<Value>> {
    state.knowledge.upsert_field_mapping(mapping.clone()).await?;
    Ok(Json(json!({ "fieldMapping": mapping })))
}

pub async fn get_prompt(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<Value>> {
    let active = state.knowledge.get_active_prompt(&name).await?;
    Ok(Json(json!({ "active": active })))
}

pub async fn put_prompt(State(state): State<AppState>, Json(version): Json<PromptVersion>) -> ApiResult<Json<Value>> {
    state.knowledge.put_prompt(version.clone()).await?;
    Ok(Json(json!({ "prompt": version })))
}

#[derive(Debug, Deserialize)]
pub struct ActivatePromptRequest {
    pub name: String,
    pub version: i32,
}

pub async fn activate_prompt(
    State(state): State<AppState>,
    Json(request): Json<ActivatePromptRequest>,
) -> ApiResult<Json<Value>> {
    state.knowledge.activate_prompt(&request.name, request.version).await?;
    Ok(Json(json!({ "activated": true })))
}
