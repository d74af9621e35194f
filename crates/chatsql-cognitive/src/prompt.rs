//! Prompt Composer (C5).
//!
//! Interpolates the active system prompt template with the schema summary,
//! business-term glossary, formatted exemplars and a user personalization
//! block. Grounded on the teacher's `PromptBuilder` template interpolation
//! in `brain-cognitive::conversation::prompt` (placeholder substitution
//! plus a cached, versioned template), with the LRU cache itself grounded
//! on the teacher's `WorkingMemoryRepository`'s bounded recency eviction
//! (`brain-core::memory::working`).

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use chatsql_core::KnowledgeStore;
use chatsql_types::model::{Exemplar, ExpertiseLevel, TableCandidate, UserProfile};
use chatsql_types::Result;

use crate::analyzer::Analysis;

const PROMPT_CACHE_CAPACITY: usize = 200;
const PROMPT_NAME: &str = "system_prompt";

const DEFAULT_SYSTEM_PROMPT: &str = "You are a careful analytics assistant. Use the \
`run_sql` tool to answer questions with read-only SELECT queries, then `visualize_data` \
when a chart would help. Only reference tables and columns that appear in the schema \
summary below; ask a clarifying question instead of guessing when knowledge is missing.";

/// Implements C5: builds the final system prompt sent to the LLM for one
/// request, reusing the prior result when the inputs haven't changed.
pub struct PromptComposer {
    knowledge: Arc<dyn KnowledgeStore>,
    cache: Mutex<LruCache>,
}

impl PromptComposer {
    pub fn new(knowledge: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            knowledge,
            cache: Mutex::new(LruCache::new(PROMPT_CACHE_CAPACITY)),
        }
    }

    pub async fn compose(&self, user: &UserProfile, analysis: &Analysis, exemplars: &[Exemplar]) -> Result<String> {
        let active = self.knowledge.get_active_prompt(PROMPT_NAME).await?;
        let prompt_version_id = active
            .as_ref()
            .map(|p| format!("{}:{}", p.name, p.version))
            .unwrap_or_else(|| "default".to_string());

        let analysis_fingerprint = fingerprint_analysis(analysis, exemplars);
        let cache_key = format!("{prompt_version_id}|{}|{analysis_fingerprint}", user.user_id);

        if let Some(cached) = self.cache.lock().unwrap().get(&cache_key) {
            return Ok(cached);
        }

        let template = active.map(|p| p.body).unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let composed = render(&template, user, analysis, exemplars);

        self.cache.lock().unwrap().insert(cache_key, composed.clone());
        Ok(composed)
    }
}

fn render(template: &str, user: &UserProfile, analysis: &Analysis, exemplars: &[Exemplar]) -> String {
    let mut out = String::with_capacity(template.len() + 512);
    out.push_str(template);
    out.push_str("\n\n");
    out.push_str(&schema_summary(&analysis.candidate_tables));
    out.push_str("\n\n");
    out.push_str(&glossary(analysis));
    out.push_str("\n\n");
    out.push_str(&exemplar_block(exemplars));
    out.push_str("\n\n");
    out.push_str(&personalization_block(user));
    out
}

fn schema_summary(tables: &[TableCandidate]) -> String {
    if tables.is_empty() {
        return "Schema: no candidate tables were identified for this question.".to_string();
    }
    let mut lines = vec!["Schema summary (candidate tables, most relevant first):".to_string()];
    for t in tables {
        lines.push(format!("- {} (score {:.2}): {}", t.table, t.score, t.reason));
    }
    lines.join("\n")
}

fn glossary(analysis: &Analysis) -> String {
    if analysis.relevant_knowledge.is_empty() {
        return "Glossary: no business terms matched this question.".to_string();
    }
    let mut lines = vec!["Glossary:".to_string()];
    for k in &analysis.relevant_knowledge {
        lines.push(format!("- {} ({:?}): {}", k.keyword, k.kind, k.description));
    }
    lines.join("\n")
}

fn exemplar_block(exemplars: &[Exemplar]) -> String {
    if exemplars.is_empty() {
        return "Examples: none available.".to_string();
    }
    let mut lines = vec!["Examples:".to_string()];
    for e in exemplars {
        lines.push(format!("Q: {} A (SQL): {}", e.question, e.sql));
    }
    lines.join("\n")
}

fn personalization_block(user: &UserProfile) -> String {
    let mut lines = Vec::new();
    match user.expertise {
        ExpertiseLevel::Beginner => {
            lines.push("Explain each step in plain language before giving the SQL.".to_string())
        }
        ExpertiseLevel::Intermediate => lines.push("Keep explanations brief; show the SQL.".to_string()),
        ExpertiseLevel::Expert => lines.push("Skip explanations; return SQL and results only.".to_string()),
    }
    if let Some(chart) = user.preferred_chart {
        lines.push(format!("Default to a {chart:?} chart when a visualization is appropriate."));
    }
    if !user.focus_dimensions.is_empty() {
        lines.push(format!("This user usually cares about: {}.", user.focus_dimensions.join(", ")));
    }
    if lines.is_empty() {
        "No personalization on file for this user.".to_string()
    } else {
        lines.join(" ")
    }
}

fn fingerprint_analysis(analysis: &Analysis, exemplars: &[Exemplar]) -> String {
    let mut hasher = DefaultHasher::new();
    analysis.rewritten_question.hash(&mut hasher);
    for t in &analysis.candidate_tables {
        t.table.hash(&mut hasher);
    }
    for e in exemplars {
        e.question.hash(&mut hasher);
    }
    format!("{:x}", hasher.finish())
}

/// Bounded LRU string cache. Plain `HashMap` + recency queue rather than a
/// dedicated crate dependency, since the only operations needed are
/// get-and-promote and insert-with-eviction.
struct LruCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, String>,
}

impl LruCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    fn get(&mut self, key: &str) -> Option<String> {
        if !self.entries.contains_key(key) {
            return None;
        }
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).unwrap();
            self.order.push_back(k);
        }
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: String, value: String) {
        if self.entries.contains_key(&key) {
            self.entries.insert(key.clone(), value);
            if let Some(pos) = self.order.iter().position(|k| k == &key) {
                let k = self.order.remove(pos).unwrap();
                self.order.push_back(k);
            }
            return;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatsql_types::model::{
        BusinessTerm, FieldMapping, KnowledgeKind, KnowledgeRef, PromptVersion, QaPair, QueryHistory, TimeRule,
        UserGroup,
    };
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    struct StubKnowledgeStore {
        active: StdMutex<Option<PromptVersion>>,
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
            Ok(self.active.lock().unwrap().clone())
        }
        async fn get_active_prompt(&self, _name: &str) -> Result<Option<PromptVersion>> {
            Ok(self.active.lock().unwrap().clone())
        }
        async fn put_prompt(&self, version: PromptVersion) -> Result<()> {
            *self.active.lock().unwrap() = Some(version);
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
            Ok(Vec::new())
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

    fn sample_analysis() -> Analysis {
        Analysis {
            semantic_tokens: Vec::new(),
            rewritten_question: "total revenue by region last month".to_string(),
            candidate_tables: vec![TableCandidate {
                table: "sales".to_string(),
                score: 0.8,
                reason: "matched terms [revenue]".to_string(),
            }],
            relevant_knowledge: vec![KnowledgeRef {
                keyword: "revenue".to_string(),
                kind: KnowledgeKind::BusinessTerm,
                description: "total sales amount".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn falls_back_to_builtin_default_when_no_prompt_active() {
        let store = Arc::new(StubKnowledgeStore {
            active: StdMutex::new(None),
        });
        let composer = PromptComposer::new(store);
        let mut user = UserProfile::new_default("u1");
        user.group = UserGroup::User;

        let prompt = composer.compose(&user, &sample_analysis(), &[]).await.unwrap();
        assert!(prompt.contains("careful analytics assistant"));
        assert!(prompt.contains("sales"));
    }

    #[tokio::test]
    async fn repeated_calls_with_same_inputs_hit_the_cache() {
        let store = Arc::new(StubKnowledgeStore {
            active: StdMutex::new(Some(PromptVersion {
                name: "system_prompt".to_string(),
                version: 1,
                body: "Custom base prompt.".to_string(),
                is_active: true,
            })),
        });
        let composer = PromptComposer::new(store);
        let user = UserProfile::new_default("u1");
        let analysis = sample_analysis();

        let first = composer.compose(&user, &analysis, &[]).await.unwrap();
        let second = composer.compose(&user, &analysis, &[]).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn lru_cache_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.insert("a".to_string(), "1".to_string());
        cache.insert("b".to_string(), "2".to_string());
        assert_eq!(cache.get("a"), Some("1".to_string()));
        cache.insert("c".to_string(), "3".to_string());
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a"), Some("1".to_string()));
        assert_eq!(cache.get("c"), Some("3".to_string()));
    }
}
