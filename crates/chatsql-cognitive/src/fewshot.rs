//! Few-Shot Selector (C4).
//!
//! Merges two exemplar sources — the RAG corpus and a user's own execution
//! memory — into a single ranked, deduplicated list. Grounded on the
//! teacher's weighted multi-source retrieval in
//! `brain-cognitive::conversation::rag` (`RagOrchestrator::retrieve_context`),
//! which also blends several candidate sources by a fixed weight before
//! deduplicating.

use std::collections::HashMap;
use std::sync::Arc;

use chatsql_core::provider::cosine_similarity;
use chatsql_core::{ConversationStore, Embedder, KnowledgeStore};
use chatsql_types::event::FewShotDebug;
use chatsql_types::model::{Exemplar, ExemplarSource};
use chatsql_types::Result;

const RAG_WEIGHT: f64 = 0.6;
const MEMORY_WEIGHT: f64 = 0.4;
const RAG_COMPOSITE_FLOOR: f64 = 3.5;
const RAG_QUALITY_FLOOR: f64 = 0.7;
const DEFAULT_LIMIT: usize = 3;
const CANDIDATE_POOL: usize = 10;

/// Result of [`FewShotSelector::select`].
#[derive(Debug, Clone)]
pub struct FewShotResult {
    pub exemplars: Vec<Exemplar>,
    pub debug: Option<FewShotDebug>,
}

/// One scored exemplar candidate before the final cap, kept internal so
/// dedup and sorting can work on a uniform shape regardless of source.
struct Candidate {
    question: String,
    sql: String,
    source: ExemplarSource,
    similarity: f64,
    effective_score: f64,
}

pub struct FewShotSelector {
    knowledge: Arc<dyn KnowledgeStore>,
    conversations: Arc<dyn ConversationStore>,
    embedder: Arc<dyn Embedder>,
}

impl FewShotSelector {
    pub fn new(
        knowledge: Arc<dyn KnowledgeStore>,
        conversations: Arc<dyn ConversationStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            knowledge,
            conversations,
            embedder,
        }
    }

    pub async fn select(
        &self,
        question: &str,
        user_id: &str,
        limit: Option<usize>,
        return_debug: bool,
    ) -> Result<FewShotResult> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        let question_embedding = self.embedder.embed(question).await.unwrap_or_default();

        let rag_candidates = self.rag_candidates(&question_embedding).await?;
        let memory_candidates = self.memory_candidates(user_id, &question_embedding).await?;

        let rag_count = rag_candidates.len();
        let memory_count = memory_candidates.len();

        let mut merged: HashMap<String, Candidate> = HashMap::new();
        for candidate in rag_candidates.into_iter().chain(memory_candidates) {
            let fingerprint = candidate.question.trim().to_lowercase();
            let should_insert = match merged.get(&fingerprint) {
                Some(existing) => existing.effective_score < candidate.effective_score,
                None => true,
            };
            if should_insert {
                merged.insert(fingerprint, candidate);
            }
        }

        let mut ranked: Vec<Candidate> = merged.into_values().collect();
        ranked.sort_by(|a, b| {
            b.effective_score
                .partial_cmp(&a.effective_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked.truncate(limit);

        let exemplars = ranked
            .into_iter()
            .map(|c| Exemplar {
                question: c.question,
                sql: c.sql,
                source: c.source,
                similarity: c.similarity,
            })
            .collect();

        let debug = return_debug.then(|| FewShotDebug {
            rag_used: rag_count > 0,
            rag_count,
            memory_used: memory_count > 0,
            memory_count,
        });

        Ok(FewShotResult { exemplars, debug })
    }

    async fn rag_candidates(&self, question_embedding: &[f32]) -> Result<Vec<Candidate>> {
        if question_embedding.is_empty() {
            return Ok(Vec::new());
        }
        let pairs = self
            .knowledge
            .top_k_qa_pairs(question_embedding, CANDIDATE_POOL)
            .await?;

        Ok(pairs
            .into_iter()
            .filter(|p| p.composite_score >= RAG_COMPOSITE_FLOOR && p.quality_score >= RAG_QUALITY_FLOOR)
            .map(|p| {
                let similarity = cosine_similarity(question_embedding, &p.embedding);
                Candidate {
                    question: p.question,
                    sql: p.sql,
                    source: ExemplarSource::Rag,
                    similarity,
                    effective_score: RAG_WEIGHT * similarity,
                }
            })
            .collect())
    }

    async fn memory_candidates(&self, user_id: &str, question_embedding: &[f32]) -> Result<Vec<Candidate>> {
        let history = self
            .conversations
            .recent_successful_sql(user_id, CANDIDATE_POOL)
            .await?;
        if history.is_empty() {
            return Ok(Vec::new());
        }

        let now = chrono::Utc::now();
        let mut candidates = Vec::with_capacity(history.len());
        for (rank, entry) in history.into_iter().enumerate() {
            let similarity = if question_embedding.is_empty() {
                0.0
            } else {
                let entry_embedding = self.embedder.embed(&entry.question).await.unwrap_or_default();
                cosine_similarity(question_embedding, &entry_embedding)
            };

            let age_hours = (now - entry.executed_at).num_seconds().max(0) as f64 / 3600.0;
            let recency_score = 1.0 / (1.0 + age_hours / 24.0);
            // Most-recent-first order from the store already approximates
            // rank; combine it with the decay so ties fall back to rank.
            let recency_score = recency_score * (1.0 - (rank as f64 * 0.01).min(0.3));

            candidates.push(Candidate {
                question: entry.question,
                sql: entry.sql,
                source: ExemplarSource::Memory,
                similarity,
                effective_score: MEMORY_WEIGHT * recency_score * similarity,
            });
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatsql_core::provider::ExecutedSqlMemory;
    use chatsql_core::testing::FakeEmbedder;
    use chatsql_types::model::{
        BusinessTerm, FieldMapping, PromptVersion, QaPair, QaSource, QueryHistory, TimeRule, UserProfile,
    };
    use chrono::Utc;
    use uuid::Uuid;

    struct StubKnowledgeStore {
        pairs: Vec<QaPair>,
    }

    #[async_trait]
    impl KnowledgeStore for StubKnowledgeStore {
        async fn list_time_rules(&self) -> Result<Vec<TimeRule>> {
            Ok(Vec::new())
        }
        async fn upsert_time_rule(&self, _rule: TimeRule) -> Result<()> {
            Ok(())
        }
        async fn list_business_terms(&self) -> Result<Vec<BusinessTerm>> {
            Ok(Vec::new())
        }
        async fn upsert_business_term(&self, _term: BusinessTerm) -> Result<()> {
            Ok(())
        }
        async fn list_field_mappings(&self) -> Result<Vec<FieldMapping>> {
            Ok(Vec::new())
        }
        async fn upsert_field_mapping(&self, _mapping: FieldMapping) -> Result<()> {
            Ok(())
        }
        async fn get_prompt(&self, _name: &str) -> Result<Option<PromptVersion>> {
            Ok(None)
        }
        async fn get_active_prompt(&self, _name: &str) -> Result<Option<PromptVersion>> {
            Ok(None)
        }
        async fn put_prompt(&self, _version: PromptVersion) -> Result<()> {
            Ok(())
        }
        async fn activate_prompt(&self, _name: &str, _version: i32) -> Result<()> {
            Ok(())
        }
        async fn get_user_profile(&self, _user_id: &str) -> Result<Option<UserProfile>> {
            Ok(None)
        }
        async fn put_user_profile(&self, _profile: UserProfile) -> Result<()> {
            Ok(())
        }
        async fn append_query_history(&self, _entry: QueryHistory) -> Result<()> {
            Ok(())
        }
        async fn recent_query_history(&self, _user_id: &str, _limit: usize) -> Result<Vec<QueryHistory>> {
            Ok(Vec::new())
        }
        async fn top_k_qa_pairs(&self, _embedding: &[f32], _k: usize) -> Result<Vec<QaPair>> {
            Ok(self.pairs.clone())
        }
        async fn get_qa_pair(&self, _id: Uuid) -> Result<Option<QaPair>> {
            Ok(None)
        }
        async fn put_qa_pair(&self, _pair: QaPair) -> Result<()> {
            Ok(())
        }
        async fn delete_qa_pair(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn evictable_qa_pairs(&self) -> Result<Vec<QaPair>> {
            Ok(Vec::new())
        }
        async fn high_score_qa_pairs(&self, _min_score: f64, _limit: usize) -> Result<Vec<QaPair>> {
            Ok(Vec::new())
        }
    }

    struct StubConversationStore {
        memory: Vec<ExecutedSqlMemory>,
    }

    #[async_trait]
    impl ConversationStore for StubConversationStore {
        async fn create_conversation(&self, _conversation: chatsql_types::model::Conversation) -> Result<()> {
            Ok(())
        }
        async fn get_conversation(&self, _id: Uuid) -> Result<Option<chatsql_types::model::Conversation>> {
            Ok(None)
        }
        async fn list_conversations(&self, _user_id: &str) -> Result<Vec<chatsql_types::model::Conversation>> {
            Ok(Vec::new())
        }
        async fn delete_conversation(&self, _id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn mark_conversation_error(&self, _id: Uuid, _error: bool) -> Result<()> {
            Ok(())
        }
        async fn persist_message(&self, _message: chatsql_types::model::Message) -> Result<()> {
            Ok(())
        }
        async fn load_transcript(&self, _conversation_id: Uuid) -> Result<Vec<chatsql_types::model::Message>> {
            Ok(Vec::new())
        }
        async fn rate(&self, _feedback: chatsql_types::model::Feedback) -> Result<()> {
            Ok(())
        }
        async fn current_feedback(&self, _conversation_id: Uuid) -> Result<Option<chatsql_types::model::Feedback>> {
            Ok(None)
        }
        async fn feedback_history(&self, _conversation_id: Uuid) -> Result<Vec<chatsql_types::model::Feedback>> {
            Ok(Vec::new())
        }
        async fn recent_successful_sql(&self, _user_id: &str, _limit: usize) -> Result<Vec<ExecutedSqlMemory>> {
            Ok(self.memory.clone())
        }
    }

    fn qa_pair(question: &str, sql: &str, composite: f64, quality: f64, embedding: Vec<f32>) -> QaPair {
        QaPair {
            id: Uuid::new_v4(),
            question: question.to_string(),
            sql: sql.to_string(),
            answer_preview: None,
            embedding,
            raw_score: composite,
            composite_score: composite,
            quality_score: quality,
            source: QaSource::Expert,
            tags: Vec::new(),
            category: None,
            usage_count: 0,
            last_used_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn filters_rag_candidates_below_score_gates() {
        let embedder = Arc::new(FakeEmbedder::default());
        let question_embedding = embedder.embed("total sales this month").await.unwrap();

        let knowledge = Arc::new(StubKnowledgeStore {
            pairs: vec![
                qa_pair("total sales this month", "SELECT sum(revenue) FROM sales", 4.2, 0.9, question_embedding.clone()),
                qa_pair("low quality match", "SELECT 1", 4.5, 0.3, question_embedding.clone()),
            ],
        });
        let conversations = Arc::new(StubConversationStore { memory: Vec::new() });
        let selector = FewShotSelector::new(knowledge, conversations, embedder);

        let result = selector.select("total sales this month", "u1", None, true).await.unwrap();
        assert_eq!(result.exemplars.len(), 1);
        assert_eq!(result.exemplars[0].sql, "SELECT sum(revenue) FROM sales");
        let debug = result.debug.unwrap();
        assert_eq!(debug.rag_count, 1);
        assert!(!debug.memory_used);
    }

    #[tokio::test]
    async fn merges_and_caps_to_limit() {
        let embedder = Arc::new(FakeEmbedder::default());
        let embedding = embedder.embed("revenue by region").await.unwrap();

        let knowledge = Arc::new(StubKnowledgeStore {
            pairs: vec![
                qa_pair("revenue by region", "SELECT region, sum(revenue) FROM sales GROUP BY region", 4.0, 0.8, embedding.clone()),
                qa_pair("revenue trend", "SELECT date, revenue FROM sales", 4.0, 0.8, embedding.clone()),
            ],
        });
        let conversations = Arc::new(StubConversationStore {
            memory: vec![ExecutedSqlMemory {
                question: "revenue by region last quarter".to_string(),
                sql: "SELECT region, sum(revenue) FROM sales WHERE quarter = 'last'".to_string(),
                executed_at: Utc::now(),
            }],
        });
        let selector = FewShotSelector::new(knowledge, conversations, embedder);

        let result = selector.select("revenue by region", "u1", Some(2), false).await.unwrap();
        assert_eq!(result.exemplars.len(), 2);
        assert!(result.debug.is_none());
    }
}
