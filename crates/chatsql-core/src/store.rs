//! Storage abstractions for C1 (Knowledge Store), C8 (Conversation Log &
//! Feedback), and the CSV artifact directory (spec §6 "Persisted layout").

use async_trait::async_trait;
use chatsql_types::model::{
    BusinessTerm, Conversation, Feedback, FieldMapping, Message, PromptVersion, QaPair,
    QueryHistory, TimeRule, UserProfile,
};
use chatsql_types::Result;
use uuid::Uuid;

/// Persistent store of time rules, business terms, field aliases, prompt
/// versions, user profiles, and the RAG Q/A corpus (spec §2 C1).
///
/// Per §5, reads take shared locks and writes are serialized per entity;
/// implementations are free to choose the concurrency primitive, but
/// callers may assume per-entity write atomicity (e.g. prompt activation).
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn list_time_rules(&self) -> Result<Vec<TimeRule>>;
    async fn upsert_time_rule(&self, rule: TimeRule) -> Result<()>;

    async fn list_business_terms(&self) -> Result<Vec<BusinessTerm>>;
    async fn upsert_business_term(&self, term: BusinessTerm) -> Result<()>;

    async fn list_field_mappings(&self) -> Result<Vec<FieldMapping>>;
    async fn upsert_field_mapping(&self, mapping: FieldMapping) -> Result<()>;

    async fn get_prompt(&self, name: &str) -> Result<Option<PromptVersion>>;
    async fn get_active_prompt(&self, name: &str) -> Result<Option<PromptVersion>>;
    async fn put_prompt(&self, version: PromptVersion) -> Result<()>;
    /// Atomically deactivates every other version with the same `name`
    /// before activating `version` (spec §3 PromptVersion, §8 invariant 3).
    async fn activate_prompt(&self, name: &str, version: i32) -> Result<()>;

    async fn get_user_profile(&self, user_id: &str) -> Result<Option<UserProfile>>;
    async fn put_user_profile(&self, profile: UserProfile) -> Result<()>;

    async fn append_query_history(&self, entry: QueryHistory) -> Result<()>;
    async fn recent_query_history(&self, user_id: &str, limit: usize) -> Result<Vec<QueryHistory>>;

    /// Top-K by cosine similarity against `embedding`, filtered by the
    /// caller's score gates (the store returns candidates; gating is the
    /// Few-Shot Selector's responsibility per spec §4.2).
    async fn top_k_qa_pairs(&self, embedding: &[f32], k: usize) -> Result<Vec<QaPair>>;
    async fn get_qa_pair(&self, id: Uuid) -> Result<Option<QaPair>>;
    async fn put_qa_pair(&self, pair: QaPair) -> Result<()>;
    async fn delete_qa_pair(&self, id: Uuid) -> Result<()>;
    /// Entries eligible for background eviction (spec §4.7 Eviction):
    /// composite < 3.0 AND usage_count = 0 AND age > 30 days.
    async fn evictable_qa_pairs(&self) -> Result<Vec<QaPair>>;
    async fn high_score_qa_pairs(&self, min_score: f64, limit: usize) -> Result<Vec<QaPair>>;
}

/// Durable conversation/message log with attached debug metadata, and the
/// feedback write-through path (spec §4.6).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, conversation: Conversation) -> Result<()>;
    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;
    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>>;
    async fn delete_conversation(&self, id: Uuid) -> Result<()>;
    async fn mark_conversation_error(&self, id: Uuid, error: bool) -> Result<()>;

    /// One transaction per message (spec §4.6 "Storage is transactional
    /// per message").
    async fn persist_message(&self, message: Message) -> Result<()>;
    async fn load_transcript(&self, conversation_id: Uuid) -> Result<Vec<Message>>;

    /// Updates the singleton current-feedback row and appends to history.
    async fn rate(&self, feedback: Feedback) -> Result<()>;
    async fn current_feedback(&self, conversation_id: Uuid) -> Result<Option<Feedback>>;
    async fn feedback_history(&self, conversation_id: Uuid) -> Result<Vec<Feedback>>;

    /// Successful past `run_sql` invocations for this user, most recent
    /// first (feeds the Few-Shot Selector's user execution memory, spec
    /// §4.2).
    async fn recent_successful_sql(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<crate::provider::ExecutedSqlMemory>>;
}

/// The shared CSV artifact directory keyed by file hash (spec §5, §6).
/// Writes are atomic (write-then-rename); reads are lock-free.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn write_csv(&self, file_hash: &str, columns: &[String], rows: &[Vec<serde_json::Value>]) -> Result<()>;
    async fn exists(&self, file_hash: &str) -> Result<bool>;
}
