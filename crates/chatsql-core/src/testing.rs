//! In-memory fakes of the opaque collaborators, for use across crates'
//! test suites. Grounded on the teacher's `SimplePlaceholder*` fakes
//! (`brain-api::agents`), which stand in for a real dependency behind the
//! same trait rather than mocking at the call-site level.

use async_trait::async_trait;
use chatsql_types::error::ChatSqlError;
use chatsql_types::Result;
use std::sync::Mutex;

use crate::provider::{
    Embedder, ExecutedQuery, LlmRequest, LlmResponse, LlmTurn, QueryExecutor,
};

/// Returns a fixed turn (or cycles through a scripted sequence), so agent
/// loop tests can exercise both the "final answer" and "tool call" paths
/// deterministically.
pub struct FakeLlmProvider {
    script: Mutex<Vec<LlmTurn>>,
    fail_next: Mutex<bool>,
}

impl FakeLlmProvider {
    pub fn new(script: Vec<LlmTurn>) -> Self {
        Self {
            script: Mutex::new(script),
            fail_next: Mutex::new(false),
        }
    }

    pub fn fail_next_call(&self) {
        *self.fail_next.lock().unwrap() = true;
    }
}

#[async_trait]
impl crate::provider::LLMProvider for FakeLlmProvider {
    async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
        if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
            return Err(ChatSqlError::Upstream("fake LLM failure".to_string()));
        }
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            return Ok(LlmResponse {
                turn: LlmTurn::Text("(no more scripted turns)".to_string()),
            });
        }
        Ok(LlmResponse {
            turn: script.remove(0),
        })
    }
}

/// Deterministic bag-of-chars embedding: good enough for similarity-order
/// assertions in tests without depending on a real model.
pub struct FakeEmbedder {
    pub dim: usize,
}

impl Default for FakeEmbedder {
    fn default() -> Self {
        Self { dim: 16 }
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dim];
        for (i, byte) in text.bytes().enumerate() {
            v[i % self.dim] += byte as f32;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }
}

/// Executes nothing; returns a scripted row set, or an error for SQL
/// containing a sentinel the tests use to force an upstream failure.
pub struct FakeQueryExecutor {
    pub rows: Vec<Vec<serde_json::Value>>,
    pub columns: Vec<String>,
}

impl FakeQueryExecutor {
    pub fn empty() -> Self {
        Self {
            rows: Vec::new(),
            columns: Vec::new(),
        }
    }
}

#[async_trait]
impl QueryExecutor for FakeQueryExecutor {
    async fn execute(&self, sql: &str) -> Result<ExecutedQuery> {
        if sql.contains("__FORCE_EXECUTOR_FAILURE__") {
            return Err(ChatSqlError::Upstream("executor unavailable".to_string()));
        }
        Ok(ExecutedQuery {
            columns: self.columns.clone(),
            rows: self.rows.clone(),
        })
    }
}
