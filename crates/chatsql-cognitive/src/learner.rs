//! RAG Learner (C9).
//!
//! Scores a question/SQL/feedback triple, gates it into the RAG corpus, and
//! merges near-duplicate entries instead of letting the corpus grow
//! unbounded. Grounded on the teacher's `MemoryConsolidationEngine` scoring
//! and merge pipeline (`brain-cognitive::meta::consolidation`), which also
//! combines several weighted sub-scores behind a single gate before
//! persisting, and treats similarity-with-recency as the merge trigger
//! rather than exact-match dedup.

use std::sync::Arc;

use chatsql_core::provider::cosine_similarity;
use chatsql_core::{Embedder, KnowledgeStore};
use chatsql_types::model::{Feedback, QaPair, QaSource, UserVote};
use chatsql_types::Result;
use uuid::Uuid;

const EXPERT_WEIGHT: f64 = 0.5;
const LLM_WEIGHT: f64 = 0.3;
const USER_WEIGHT: f64 = 0.2;

const COMPOSITE_STORE_FLOOR: f64 = 4.0;
const QUALITY_STORE_FLOOR: f64 = 0.7;

const DEDUP_SIMILARITY_FLOOR: f64 = 0.93;
const MERGE_COMPOSITE_MARGIN: f64 = 0.2;

const SQL_DISALLOWED_KEYWORDS: &[&str] = &["DROP", "DELETE", "UPDATE", "INSERT", "ALTER", "PRAGMA", "ATTACH"];

/// Outcome of [`RagLearner::learn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnAction {
    Stored,
    Updated,
    Skipped,
}

pub struct RagLearner {
    knowledge: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
}

impl RagLearner {
    pub fn new(knowledge: Arc<dyn KnowledgeStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { knowledge, embedder }
    }

    pub async fn learn(
        &self,
        question: &str,
        sql: &str,
        answer_preview: Option<&str>,
        feedback: &Feedback,
    ) -> Result<LearnAction> {
        let Some(composite) = composite_score(feedback) else {
            return Ok(LearnAction::Skipped);
        };
        let quality = quality_score(question, sql, answer_preview);

        if composite < COMPOSITE_STORE_FLOOR || quality < QUALITY_STORE_FLOOR {
            return Ok(LearnAction::Skipped);
        }

        let embedding = self.embedder.embed(question).await.unwrap_or_default();
        let nearest = if embedding.is_empty() {
            None
        } else {
            self.knowledge.top_k_qa_pairs(&embedding, 1).await?.into_iter().next()
        };

        if let Some(existing) = nearest {
            let similarity = cosine_similarity(&embedding, &existing.embedding);
            if similarity >= DEDUP_SIMILARITY_FLOOR && (composite - existing.composite_score) < MERGE_COMPOSITE_MARGIN {
                let merged = QaPair {
                    composite_score: existing.composite_score.max(composite),
                    quality_score: existing.quality_score.max(quality),
                    usage_count: existing.usage_count + 1,
                    last_used_at: Some(chrono::Utc::now()),
                    updated_at: chrono::Utc::now(),
                    ..existing
                };
                self.knowledge.put_qa_pair(merged).await?;
                return Ok(LearnAction::Updated);
            }
        }

        let source = if feedback.expert_rating.is_some() {
            QaSource::Expert
        } else {
            QaSource::Feedback
        };

        let now = chrono::Utc::now();
        let pair = QaPair {
            id: Uuid::new_v4(),
            question: question.to_string(),
            sql: sql.to_string(),
            answer_preview: answer_preview.map(|a| a.to_string()),
            embedding,
            raw_score: composite,
            composite_score: composite,
            quality_score: quality,
            source,
            tags: Vec::new(),
            category: None,
            usage_count: 0,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };
        self.knowledge.put_qa_pair(pair).await?;
        Ok(LearnAction::Stored)
    }

    /// Removes entries the store reports as eligible (spec: composite < 3.0
    /// AND usage_count = 0 AND age > 30 days). Called by a periodic
    /// background task, not on the request path.
    pub async fn evict_stale(&self) -> Result<usize> {
        let stale = self.knowledge.evictable_qa_pairs().await?;
        let count = stale.len();
        for pair in stale {
            self.knowledge.delete_qa_pair(pair.id).await?;
        }
        Ok(count)
    }
}

fn composite_score(feedback: &Feedback) -> Option<f64> {
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;

    if let Some(expert) = feedback.expert_rating {
        weighted_sum += EXPERT_WEIGHT * expert as f64;
        total_weight += EXPERT_WEIGHT;
    }
    if let Some(llm) = feedback.llm_score {
        weighted_sum += LLM_WEIGHT * llm as f64;
        total_weight += LLM_WEIGHT;
    }
    if let Some(vote) = feedback.user_vote {
        if let Some(value) = user_vote_value(vote) {
            weighted_sum += USER_WEIGHT * value;
            total_weight += USER_WEIGHT;
        }
    }

    if total_weight == 0.0 {
        None
    } else {
        Some(weighted_sum / total_weight)
    }
}

fn user_vote_value(vote: UserVote) -> Option<f64> {
    match vote {
        UserVote::Like => Some(5.0),
        UserVote::Dislike => Some(1.0),
        UserVote::None => None,
    }
}

fn quality_score(question: &str, sql: &str, answer_preview: Option<&str>) -> f64 {
    clarity_score(question) + sql_validity_score(sql) + plausibility_score(answer_preview)
}

/// Up to 0.3: rewards a question with enough words to be unambiguous,
/// without rewarding unbounded length.
fn clarity_score(question: &str) -> f64 {
    let words = question.split_whitespace().count();
    let ratio = (words as f64 / 6.0).min(1.0);
    0.3 * ratio
}

/// Up to 0.4: structural SQL checks only, the same shape the agent loop's
/// safeguard enforces, not a full parse.
fn sql_validity_score(sql: &str) -> f64 {
    let upper = sql.to_uppercase();
    let mut score = 0.0;

    if upper.trim_start().starts_with("SELECT") && upper.contains("FROM") {
        score += 0.2;
    }
    if sql.len() >= 10 && sql.len() <= 2000 {
        score += 0.1;
    }
    let has_forbidden = SQL_DISALLOWED_KEYWORDS.iter().any(|kw| {
        upper.split(|c: char| !c.is_ascii_alphanumeric()).any(|token| token == *kw)
    });
    if !has_forbidden {
        score += 0.1;
    }
    score
}

/// Up to 0.3: a present, non-empty, non-error-looking answer preview is
/// evidence the query actually ran and returned something sensible.
fn plausibility_score(answer_preview: Option<&str>) -> f64 {
    match answer_preview {
        Some(preview) if !preview.trim().is_empty() => {
            let lowered = preview.to_lowercase();
            if ["error", "undefined", "null", "exception"].iter().any(|bad| lowered.contains(bad)) {
                0.1
            } else {
                0.3
            }
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatsql_core::testing::FakeEmbedder;
    use chatsql_types::model::{
        BusinessTerm, FieldMapping, PromptVersion, QueryHistory, TimeRule, UserProfile,
    };
    use chrono::Utc;

    struct StubKnowledgeStore {
        existing: std::sync::Mutex<Vec<QaPair>>,
        put_calls: std::sync::Mutex<Vec<QaPair>>,
    }

    impl StubKnowledgeStore {
        fn empty() -> Self {
            Self {
                existing: std::sync::Mutex::new(Vec::new()),
                put_calls: std::sync::Mutex::new(Vec::new()),
            }
        }
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
            Ok(self.existing.lock().unwrap().clone())
        }
        async fn get_qa_pair(&self, _id: Uuid) -> Result<Option<QaPair>> {
            Ok(None)
        }
        async fn put_qa_pair(&self, pair: QaPair) -> Result<()> {
            self.put_calls.lock().unwrap().push(pair);
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

    fn high_confidence_feedback() -> Feedback {
        Feedback {
            conversation_id: Uuid::new_v4(),
            expert_rating: Some(5),
            user_vote: Some(UserVote::Like),
            llm_score: Some(4),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn skips_when_no_ratings_present() {
        let store = Arc::new(StubKnowledgeStore::empty());
        let embedder = Arc::new(FakeEmbedder::default());
        let learner = RagLearner::new(store, embedder);

        let feedback = Feedback {
            conversation_id: Uuid::new_v4(),
            expert_rating: None,
            user_vote: None,
            llm_score: None,
            timestamp: Utc::now(),
        };
        let action = learner
            .learn(
                "what is total revenue by region this quarter",
                "SELECT region, sum(revenue) FROM sales GROUP BY region",
                Some("region A: 100, region B: 200"),
                &feedback,
            )
            .await
            .unwrap();
        assert_eq!(action, LearnAction::Skipped);
    }

    #[tokio::test]
    async fn stores_a_new_entry_when_gates_are_cleared_and_nothing_similar_exists() {
        let store = Arc::new(StubKnowledgeStore::empty());
        let embedder = Arc::new(FakeEmbedder::default());
        let learner = RagLearner::new(store.clone(), embedder);

        let action = learner
            .learn(
                "what is total revenue by region this quarter",
                "SELECT region, sum(revenue) FROM sales GROUP BY region",
                Some("region A: 100, region B: 200"),
                &high_confidence_feedback(),
            )
            .await
            .unwrap();

        assert_eq!(action, LearnAction::Stored);
        let stored = store.put_calls.lock().unwrap().remove(0);
        assert_eq!(stored.source, QaSource::Expert);
    }

    #[tokio::test]
    async fn stores_with_feedback_source_when_no_expert_rating_is_present() {
        let store = Arc::new(StubKnowledgeStore::empty());
        let embedder = Arc::new(FakeEmbedder::default());
        let learner = RagLearner::new(store.clone(), embedder);

        let feedback = Feedback {
            conversation_id: Uuid::new_v4(),
            expert_rating: None,
            user_vote: Some(UserVote::Like),
            llm_score: Some(5),
            timestamp: Utc::now(),
        };

        let action = learner
            .learn(
                "what is total revenue by region this quarter",
                "SELECT region, sum(revenue) FROM sales GROUP BY region",
                Some("region A: 100, region B: 200"),
                &feedback,
            )
            .await
            .unwrap();

        assert_eq!(action, LearnAction::Stored);
        let stored = store.put_calls.lock().unwrap().remove(0);
        assert_eq!(stored.source, QaSource::Feedback);
    }

    #[tokio::test]
    async fn merges_into_a_near_duplicate_instead_of_storing_twice() {
        let embedder = Arc::new(FakeEmbedder::default());
        let question = "total revenue by region this quarter";
        let embedding = embedder.embed(question).await.unwrap();

        let store = Arc::new(StubKnowledgeStore::empty());
        store.existing.lock().unwrap().push(QaPair {
            id: Uuid::new_v4(),
            question: question.to_string(),
            sql: "SELECT region, sum(revenue) FROM sales GROUP BY region".to_string(),
            answer_preview: None,
            embedding,
            raw_score: 4.1,
            composite_score: 4.1,
            quality_score: 0.8,
            source: QaSource::Feedback,
            tags: Vec::new(),
            category: None,
            usage_count: 3,
            last_used_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });

        let learner = RagLearner::new(store.clone(), embedder);
        let action = learner
            .learn(
                question,
                "SELECT region, sum(revenue) FROM sales GROUP BY region",
                Some("region A: 100"),
                &high_confidence_feedback(),
            )
            .await
            .unwrap();

        assert_eq!(action, LearnAction::Updated);
        let merged = store.put_calls.lock().unwrap().remove(0);
        assert_eq!(merged.usage_count, 4);
    }

    #[test]
    fn composite_score_ignores_absent_ratings() {
        let feedback = Feedback {
            conversation_id: Uuid::new_v4(),
            expert_rating: Some(5),
            user_vote: None,
            llm_score: None,
            timestamp: Utc::now(),
        };
        assert_eq!(composite_score(&feedback), Some(5.0));
    }
}
