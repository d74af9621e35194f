//! Thin HTTP stub adapters for the opaque `LLMProvider`/`Embedder`/
//! `QueryExecutor` collaborators (spec §1: these are external systems;
//! this crate only needs *a* concrete implementation for local
//! development and integration tests, grounded on the teacher's
//! `HttpClient` wrapper in `brain-infra::http`).

use async_trait::async_trait;
use chatsql_core::provider::{ExecutedQuery, LlmRequest, LlmResponse, LlmToolCall, LlmTurn};
use chatsql_core::{Embedder, LLMProvider, QueryExecutor};
use chatsql_types::{ChatSqlError, Result};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

fn build_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build HTTP client")
}

/// Speaks an OpenAI-compatible chat-completions-with-tools wire format.
pub struct HttpLlmProvider {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpLlmProvider {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: build_client(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl LLMProvider for HttpLlmProvider {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let mut messages = vec![json!({"role": "system", "content": request.system_prompt})];
        for m in &request.messages {
            messages.push(json!({
                "role": m.role,
                "content": m.content,
                "tool_call_id": m.tool_call_id,
            }));
        }
        let tools: Vec<_> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let body = json!({ "messages": messages, "tools": tools });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatSqlError::Upstream(format!("LLM request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ChatSqlError::Upstream(format!(
                "LLM returned status {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChatSqlError::Upstream(format!("LLM response decode failed: {e}")))?;

        parse_completion(&value)
    }
}

fn parse_completion(value: &serde_json::Value) -> Result<LlmResponse> {
    let choice = value
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| ChatSqlError::Upstream("LLM response missing choices".to_string()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| ChatSqlError::Upstream("LLM response missing message".to_string()))?;

    if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
        if !calls.is_empty() {
            let tool_calls = calls
                .iter()
                .map(|c| -> Result<LlmToolCall> {
                    let function = c
                        .get("function")
                        .ok_or_else(|| ChatSqlError::Upstream("tool call missing function".to_string()))?;
                    let name = function
                        .get("name")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| ChatSqlError::Upstream("tool call missing name".to_string()))?
                        .to_string();
                    let arguments_raw = function.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}");
                    let arguments: serde_json::Value = serde_json::from_str(arguments_raw)?;
                    let id = c
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    Ok(LlmToolCall { id, name, arguments })
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok(LlmResponse {
                turn: LlmTurn::ToolCalls(tool_calls),
            });
        }
    }

    let text = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Ok(LlmResponse {
        turn: LlmTurn::Text(text),
    })
}

/// Speaks an OpenAI-compatible embeddings wire format.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: build_client(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({ "input": text }))
            .send()
            .await
            .map_err(|e| ChatSqlError::Upstream(format!("embedder request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ChatSqlError::Upstream(format!(
                "embedder returned status {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChatSqlError::Upstream(format!("embedder response decode failed: {e}")))?;

        let embedding = value
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(|d| d.get("embedding"))
            .and_then(|e| e.as_array())
            .ok_or_else(|| ChatSqlError::Upstream("embedder response missing embedding".to_string()))?;

        Ok(embedding
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect())
    }
}

/// Executes a validated `SELECT` against an HTTP-exposed tabular engine.
/// The URL points at the caller's own `QueryExecutor` capability (spec §1
/// treats it as opaque); this adapter exists only so `chatsql-cli` has a
/// working default when no in-process executor is wired in.
pub struct HttpQueryExecutor {
    client: Client,
    endpoint: String,
}

impl HttpQueryExecutor {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: build_client(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    async fn execute(&self, sql: &str) -> Result<ExecutedQuery> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "sql": sql }))
            .send()
            .await
            .map_err(|e| ChatSqlError::Upstream(format!("query executor request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ChatSqlError::Upstream(format!(
                "query executor returned status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ChatSqlError::Upstream(format!("query executor response decode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_completion() {
        let value = json!({
            "choices": [{ "message": { "content": "hello there" } }]
        });
        let response = parse_completion(&value).unwrap();
        match response.turn {
            LlmTurn::Text(t) => assert_eq!(t, "hello there"),
            LlmTurn::ToolCalls(_) => panic!("expected text turn"),
        }
    }

    #[test]
    fn parses_tool_call_completion() {
        let value = json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "function": { "name": "run_sql", "arguments": "{\"sql\": \"SELECT 1\"}" }
                    }]
                }
            }]
        });
        let response = parse_completion(&value).unwrap();
        match response.turn {
            LlmTurn::ToolCalls(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].name, "run_sql");
                assert_eq!(calls[0].arguments["sql"], "SELECT 1");
            }
            LlmTurn::Text(_) => panic!("expected tool call turn"),
        }
    }

    #[test]
    fn missing_choices_is_an_upstream_error() {
        let value = json!({});
        assert!(parse_completion(&value).is_err());
    }
}
