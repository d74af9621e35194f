//! The opaque collaborators named in spec.md §1
//!
//! `QueryExecutor`, `LLMProvider`, and `Embedder` are treated as external
//! capabilities: this crate defines their contracts only. Concrete
//! implementations (a real tabular engine, a hosted LLM, an embedding
//! service) are supplied by `chatsql-infra` or by the host application.

use async_trait::async_trait;
use chatsql_types::Result;
use serde::{Deserialize, Serialize};

/// Executes a validated SQL string and returns rows plus a column schema.
/// The agent loop is the only caller; SQL has already passed the
/// safeguarding checks of spec §4.4 before reaching this trait.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<ExecutedQuery>;
}

/// Raw result of executing a query, prior to CSV materialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedQuery {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// A chat-style language model turn: either a final text answer or one or
/// more tool calls (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LlmTurn {
    Text(String),
    ToolCalls(Vec<LlmToolCall>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A JSON-schema-shaped tool declaration passed to the model alongside
/// the transcript. Tool declarations are data, not hardcoded in the
/// provider (SPEC_FULL §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// One role-tagged message in the running chat transcript sent to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
    /// Set on assistant messages that requested tool calls.
    #[serde(default)]
    pub tool_calls: Vec<LlmToolCall>,
    /// Set on tool-role messages: which call this result answers.
    pub tool_call_id: Option<String>,
}

/// One round-trip request to the LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub messages: Vec<LlmMessage>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub turn: LlmTurn,
}

/// A single round-trip to the language model provider.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Converts text to a fixed-dimension embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Cosine similarity between two embeddings of equal dimension.
    fn cosine_similarity(a: &[f32], b: &[f32]) -> f64
    where
        Self: Sized,
    {
        cosine_similarity(a, b)
    }
}

/// A past successful `run_sql` invocation by a given user, as surfaced to
/// the Few-Shot Selector's "user execution memory" source (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedSqlMemory {
    pub question: String,
    pub sql: String,
    pub executed_at: chrono::DateTime<chrono::Utc>,
}

/// Free function used by both the Embedder's default method and callers
/// who already hold two vectors (the Few-Shot Selector compares many
/// pairs without re-embedding).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn mismatched_lengths_are_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
