//! Infrastructure adapters for chatsql
//!
//! Concrete implementations of the `chatsql-core` traits: a sqlx-SQLite
//! backed `KnowledgeStore` and `ConversationStore`, a filesystem CSV
//! `ArtifactStore`, environment-based configuration loading, and thin HTTP
//! stub adapters for the opaque `LLMProvider`/`Embedder`/`QueryExecutor`
//! collaborators.

pub mod artifacts;
pub mod config;
pub mod conversation_store;
pub mod knowledge_store;
pub mod providers;

pub use artifacts::FilesystemArtifactStore;
pub use conversation_store::SqliteConversationStore;
pub use knowledge_store::SqliteKnowledgeStore;
pub use providers::{HttpEmbedder, HttpLlmProvider, HttpQueryExecutor};
