//! Core domain abstractions for chatsql
//!
//! This crate contains pure business contracts with no I/O: the opaque
//! collaborators named in spec.md §1 (`QueryExecutor`, `LLMProvider`,
//! `Embedder`) and the storage abstractions used by C1/C8/C9
//! (`KnowledgeStore`, `ConversationStore`, `ArtifactStore`). Infrastructure
//! implementations live in `chatsql-infra`.

pub mod provider;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use provider::{
    cosine_similarity, Embedder, ExecutedQuery, ExecutedSqlMemory, LlmMessage, LlmRequest,
    LlmResponse, LlmToolCall, LlmTurn, LLMProvider, QueryExecutor, ToolSpec,
};
pub use store::{ArtifactStore, ConversationStore, KnowledgeStore};
