//! Query Analyzer (C3).
//!
//! Turns a raw question into a rewritten question, a set of classified
//! [`SemanticToken`]s, ranked table candidates and the knowledge records
//! those tokens touched. Tokenization is grounded on the teacher's
//! `ConceptGraphManager` term-matching pass (`brain-core::concepts`), which
//! also resolves overlapping candidate spans by longest-match-first;
//! table scoring and the LLM-backed rewrite/fallback calls are original to
//! this system but reuse the teacher's `LLMProvider`-style request/response
//! shape.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use chatsql_core::{KnowledgeStore, LLMProvider, LlmMessage, LlmRequest, LlmTurn};
use chatsql_types::model::{
    BusinessTerm, BusinessTermType, FieldMapping, KnowledgeKind, KnowledgePayload, KnowledgeRef,
    SemanticToken, TableCandidate, TimeRule, TokenType,
};
use chatsql_types::Result;

/// Per-request caller context the analyzer needs but does not own.
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub user_id: String,
    pub last_turn_question: Option<String>,
    pub focus_dimensions: Vec<String>,
}

/// Output of [`QueryAnalyzer::analyze`].
#[derive(Debug, Clone)]
pub struct Analysis {
    pub semantic_tokens: Vec<SemanticToken>,
    pub rewritten_question: String,
    pub candidate_tables: Vec<TableCandidate>,
    pub relevant_knowledge: Vec<KnowledgeRef>,
}

const DEFAULT_REWRITE_PROMPT: &str = "You rewrite a user's analytics question into a \
self-contained, unambiguous form: resolve pronouns against the prior turn, expand any \
field aliases to their canonical names, and spell out relative time expressions. Answer \
with the rewritten question only, no commentary.";

const DEFAULT_TABLE_SELECT_PROMPT: &str = "Given the question and the list of candidate \
tables, choose the tables needed to answer it. Answer with a JSON array of table names, \
most relevant first.";

/// Score a table must clear before its candidacy is trusted without asking
/// the language model to pick instead. Chosen so that a single incidental
/// keyword match (score ~0.1 on a five-token question) doesn't pass on its
/// own, but two or more real matches do.
const TABLE_SCORE_FLOOR: f64 = 0.2;

const MAX_TABLE_CANDIDATES: usize = 5;
const REWRITE_CACHE_CAPACITY: usize = 100;

/// Chart-hint phrases, compounds first so the greedy matcher prefers them
/// over their constituent words (spec requirement: "变化趋势" before "趋势").
const CHART_HINT_DICT: &[(&str, &str)] = &[
    ("变化趋势", "line"),
    ("趋势变化", "line"),
    ("分布情况", "bar"),
    ("占比情况", "pie"),
    ("对比情况", "bar"),
    ("趋势", "line"),
    ("分布", "bar"),
    ("占比", "pie"),
    ("对比", "bar"),
    ("trend", "line"),
    ("distribution", "bar"),
    ("proportion", "pie"),
    ("breakdown", "bar"),
];

/// Cues that mark a sort/ranking request rather than a plain filter.
const SORT_CUE_DICT: &[&str] = &[
    "最高的", "最低的", "排名", "排行", "前十", "前 10",
    "highest", "lowest", "top", "ranking", "rank",
];

/// One ordered tokenizer entry: a literal keyword, the token type it
/// produces, and the knowledge payload to attach (if any).
#[derive(Clone)]
struct DictEntry {
    keyword: String,
    token_type: TokenType,
    knowledge: Option<KnowledgePayload>,
}

/// Snapshot of the three knowledge dictionaries, rebuilt on reload and
/// swapped in behind a lock so concurrent analyses never see a half
/// -updated dictionary.
struct Dictionaries {
    time_rules: Vec<DictEntry>,
    business_terms: Vec<DictEntry>,
    field_mappings: Vec<DictEntry>,
    /// table name -> alias strings (keywords and canonical fields) used
    /// for table scoring.
    table_aliases: HashMap<String, Vec<String>>,
}

impl Dictionaries {
    fn empty() -> Self {
        Self {
            time_rules: Vec::new(),
            business_terms: Vec::new(),
            field_mappings: Vec::new(),
            table_aliases: HashMap::new(),
        }
    }

    fn build(time_rules: Vec<TimeRule>, terms: Vec<BusinessTerm>, mappings: Vec<FieldMapping>) -> Self {
        let mut time_entries: Vec<DictEntry> = time_rules
            .into_iter()
            .map(|r| DictEntry {
                keyword: r.keyword.clone(),
                token_type: TokenType::TimeRule,
                knowledge: Some(KnowledgePayload {
                    description: r.canonical_range.clone(),
                    canonical_value: r.canonical_range,
                }),
            })
            .collect();
        sort_longest_first_stable(&mut time_entries);

        let mut term_entries: Vec<DictEntry> = terms
            .into_iter()
            .map(|t| DictEntry {
                keyword: t.keyword.clone(),
                token_type: match t.term_type {
                    BusinessTermType::Metric => TokenType::Metric,
                    BusinessTermType::Dimension => TokenType::Dimension,
                    BusinessTermType::Filter => TokenType::Comparison,
                    BusinessTermType::Entity => TokenType::Term,
                },
                knowledge: Some(KnowledgePayload {
                    description: t.description.clone(),
                    canonical_value: t.keyword,
                }),
            })
            .collect();
        sort_longest_first_stable(&mut term_entries);

        let mut table_aliases: HashMap<String, Vec<String>> = HashMap::new();
        let mut mapping_entries: Vec<DictEntry> = Vec::with_capacity(mappings.len());
        for m in mappings {
            if let Some(table) = &m.table_hint {
                let aliases = table_aliases.entry(table.clone()).or_default();
                aliases.push(m.keyword.to_lowercase());
                aliases.push(m.canonical_field.to_lowercase());
            }
            mapping_entries.push(DictEntry {
                keyword: m.keyword.clone(),
                token_type: TokenType::FieldMapping,
                knowledge: Some(KnowledgePayload {
                    description: m.canonical_field.clone(),
                    canonical_value: m.canonical_field,
                }),
            });
        }
        sort_longest_first_stable(&mut mapping_entries);

        Self {
            time_rules: time_entries,
            business_terms: term_entries,
            field_mappings: mapping_entries,
            table_aliases,
        }
    }
}

/// Stable sort by descending keyword length: equal-length entries keep
/// their original (insertion) order, which is the tie-break the
/// tokenizer relies on.
fn sort_longest_first_stable(entries: &mut [DictEntry]) {
    entries.sort_by(|a, b| b.keyword.len().cmp(&a.keyword.len()));
}

fn chart_hint_dict() -> Vec<DictEntry> {
    let mut entries: Vec<DictEntry> = CHART_HINT_DICT
        .iter()
        .map(|(phrase, hint)| DictEntry {
            keyword: phrase.to_string(),
            token_type: TokenType::ChartHint,
            knowledge: Some(KnowledgePayload {
                description: format!("chart hint: {hint}"),
                canonical_value: hint.to_string(),
            }),
        })
        .collect();
    sort_longest_first_stable(&mut entries);
    entries
}

fn sort_cue_dict() -> Vec<DictEntry> {
    let mut entries: Vec<DictEntry> = SORT_CUE_DICT
        .iter()
        .map(|phrase| DictEntry {
            keyword: phrase.to_string(),
            token_type: TokenType::Sort,
            knowledge: None,
        })
        .collect();
    sort_longest_first_stable(&mut entries);
    entries
}

/// Tiny FIFO cache for rewritten questions (spec: bounded to 100 entries,
/// eviction is oldest-in-first-out, not LRU).
struct FifoCache {
    order: VecDeque<String>,
    entries: HashMap<String, String>,
    capacity: usize,
}

impl FifoCache {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
            capacity,
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: String, value: String) {
        if self.entries.contains_key(&key) {
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

fn rewrite_fingerprint(question: &str, user_id: &str, last_turn: Option<&str>) -> String {
    let mut hasher = DefaultHasher::new();
    last_turn.unwrap_or_default().hash(&mut hasher);
    format!("{}|{}|{:x}", question.to_lowercase(), user_id, hasher.finish())
}

/// Implements C3: tokenizes, rewrites, selects candidate tables and
/// attaches knowledge for one question at a time.
pub struct QueryAnalyzer {
    knowledge: Arc<dyn KnowledgeStore>,
    llm: Arc<dyn LLMProvider>,
    dictionaries: RwLock<Arc<Dictionaries>>,
    rewrite_cache: std::sync::Mutex<FifoCache>,
}

impl QueryAnalyzer {
    pub fn new(knowledge: Arc<dyn KnowledgeStore>, llm: Arc<dyn LLMProvider>) -> Self {
        Self {
            knowledge,
            llm,
            dictionaries: RwLock::new(Arc::new(Dictionaries::empty())),
            rewrite_cache: std::sync::Mutex::new(FifoCache::new(REWRITE_CACHE_CAPACITY)),
        }
    }

    /// Reloads the three dictionaries from the knowledge store and swaps
    /// them in atomically. Called once before first use and again whenever
    /// a caller edits time rules, business terms or field mappings.
    pub async fn reload_dictionaries(&self) -> Result<()> {
        let time_rules = self.knowledge.list_time_rules().await?;
        let terms = self.knowledge.list_business_terms().await?;
        let mappings = self.knowledge.list_field_mappings().await?;
        let built = Arc::new(Dictionaries::build(time_rules, terms, mappings));
        *self.dictionaries.write().unwrap() = built;
        Ok(())
    }

    fn dictionaries(&self) -> Arc<Dictionaries> {
        Arc::clone(&self.dictionaries.read().unwrap())
    }

    pub async fn analyze(&self, question: &str, ctx: &UserContext) -> Result<Analysis> {
        let dict = self.dictionaries();
        let semantic_tokens = tokenize(question, &dict);
        let rewritten_question = self.rewrite(question, ctx).await;
        let candidate_tables = self.select_tables(&semantic_tokens, ctx, &rewritten_question, &dict).await;
        let relevant_knowledge = collect_knowledge(&semantic_tokens);

        Ok(Analysis {
            semantic_tokens,
            rewritten_question,
            candidate_tables,
            relevant_knowledge,
        })
    }

    async fn rewrite(&self, question: &str, ctx: &UserContext) -> String {
        let fingerprint = rewrite_fingerprint(question, &ctx.user_id, ctx.last_turn_question.as_deref());
        if let Some(cached) = self.rewrite_cache.lock().unwrap().get(&fingerprint) {
            return cached;
        }

        let system_prompt = self
            .knowledge
            .get_active_prompt("rewrite_prompt")
            .await
            .ok()
            .flatten()
            .map(|p| p.body)
            .unwrap_or_else(|| DEFAULT_REWRITE_PROMPT.to_string());

        let mut content = String::new();
        if let Some(last_turn) = &ctx.last_turn_question {
            content.push_str("Previous question: ");
            content.push_str(last_turn);
            content.push('\n');
        }
        content.push_str("Question: ");
        content.push_str(question);

        let request = LlmRequest {
            system_prompt,
            messages: vec![LlmMessage {
                role: "user".to_string(),
                content,
                tool_calls: Vec::new(),
                tool_call_id: None,
            }],
            tools: Vec::new(),
        };

        match self.llm.complete(request).await {
            Ok(response) => match response.turn {
                LlmTurn::Text(text) if !text.trim().is_empty() => {
                    let rewritten = text.trim().to_string();
                    self.rewrite_cache.lock().unwrap().insert(fingerprint, rewritten.clone());
                    rewritten
                }
                _ => question.to_string(),
            },
            Err(_) => question.to_string(),
        }
    }

    async fn select_tables(
        &self,
        tokens: &[SemanticToken],
        ctx: &UserContext,
        rewritten_question: &str,
        dict: &Dictionaries,
    ) -> Vec<TableCandidate> {
        let relevant: Vec<&SemanticToken> = tokens
            .iter()
            .filter(|t| {
                matches!(
                    t.token_type,
                    TokenType::Metric | TokenType::Dimension | TokenType::Term | TokenType::Comparison | TokenType::FieldMapping
                )
            })
            .collect();

        let mut scored: Vec<TableCandidate> = Vec::new();
        for (table, aliases) in &dict.table_aliases {
            let mut matched_terms: Vec<String> = Vec::new();
            for token in &relevant {
                let haystack = token.text.to_lowercase();
                let canonical = token
                    .knowledge
                    .as_ref()
                    .map(|k| k.canonical_value.to_lowercase())
                    .unwrap_or_default();
                if aliases.iter().any(|a| a == &haystack || a == &canonical) {
                    matched_terms.push(token.text.clone());
                }
            }
            if matched_terms.is_empty() && ctx.focus_dimensions.is_empty() {
                continue;
            }

            let base_score = if relevant.is_empty() {
                0.0
            } else {
                matched_terms.len() as f64 / relevant.len() as f64
            };

            let focus_hits = ctx
                .focus_dimensions
                .iter()
                .filter(|d| aliases.contains(&d.to_lowercase()))
                .count();
            let focus_boost = (0.1 * focus_hits as f64).min(0.3);

            let score = base_score + focus_boost;
            if matched_terms.is_empty() && focus_boost == 0.0 {
                continue;
            }

            let reason = if matched_terms.is_empty() {
                format!("selected via {focus_hits} user focus dimension(s)")
            } else if focus_boost > 0.0 {
                format!(
                    "matched terms [{}] plus {focus_hits} focus dimension boost",
                    matched_terms.join(", ")
                )
            } else {
                format!("matched terms [{}]", matched_terms.join(", "))
            };

            scored.push(TableCandidate {
                table: table.clone(),
                score,
                reason,
            });
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(MAX_TABLE_CANDIDATES);

        let best_score = scored.first().map(|c| c.score).unwrap_or(0.0);
        if best_score >= TABLE_SCORE_FLOOR {
            return scored;
        }

        match self.llm_table_fallback(rewritten_question, &dict.table_aliases).await {
            Some(fallback) if !fallback.is_empty() => fallback,
            _ => scored,
        }
    }

    async fn llm_table_fallback(
        &self,
        rewritten_question: &str,
        table_aliases: &HashMap<String, Vec<String>>,
    ) -> Option<Vec<TableCandidate>> {
        if table_aliases.is_empty() {
            return None;
        }
        let system_prompt = self
            .knowledge
            .get_active_prompt("table_select_prompt")
            .await
            .ok()
            .flatten()
            .map(|p| p.body)
            .unwrap_or_else(|| DEFAULT_TABLE_SELECT_PROMPT.to_string());

        let mut table_names: Vec<&String> = table_aliases.keys().collect();
        table_names.sort();
        let content = format!(
            "Question: {rewritten_question}\nCandidate tables: {}",
            table_names
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let request = LlmRequest {
            system_prompt,
            messages: vec![LlmMessage {
                role: "user".to_string(),
                content,
                tool_calls: Vec::new(),
                tool_call_id: None,
            }],
            tools: Vec::new(),
        };

        let response = self.llm.complete(request).await.ok()?;
        let text = match response.turn {
            LlmTurn::Text(t) => t,
            LlmTurn::ToolCalls(_) => return None,
        };

        let names: Vec<String> = serde_json::from_str::<Vec<String>>(&text).unwrap_or_else(|_| {
            text.split(|c: char| c == ',' || c.is_whitespace())
                .map(|s| s.trim().trim_matches(|c| c == '"' || c == '[' || c == ']').to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        let candidates: Vec<TableCandidate> = names
            .into_iter()
            .filter(|n| table_aliases.contains_key(n))
            .take(MAX_TABLE_CANDIDATES)
            .map(|table| TableCandidate {
                table,
                score: TABLE_SCORE_FLOOR,
                reason: "selected by language model fallback".to_string(),
            })
            .collect();

        if candidates.is_empty() {
            None
        } else {
            Some(candidates)
        }
    }
}

fn collect_knowledge(tokens: &[SemanticToken]) -> Vec<KnowledgeRef> {
    let mut seen: std::collections::HashSet<(String, KnowledgeKind)> = std::collections::HashSet::new();
    let mut out = Vec::new();
    for token in tokens {
        let kind = match token.token_type {
            TokenType::TimeRule => KnowledgeKind::TimeRule,
            TokenType::FieldMapping => KnowledgeKind::FieldMapping,
            TokenType::Metric | TokenType::Dimension | TokenType::Term | TokenType::Comparison => {
                KnowledgeKind::BusinessTerm
            }
            _ => continue,
        };
        let Some(knowledge) = &token.knowledge else { continue };
        let key = (token.text.clone(), kind);
        if seen.insert(key) {
            out.push(KnowledgeRef {
                keyword: token.text.clone(),
                kind,
                description: knowledge.description.clone(),
            });
        }
    }
    out
}

/// Greedy longest-match tokenizer. Runs the dictionaries in a fixed pass
/// order (time rules, business terms, field mappings, chart hints, sort
/// cues) so compounds and higher-priority categories claim a span before
/// lower-priority ones see it; within a pass, longest match wins and ties
/// break toward the earlier-inserted dictionary entry.
fn tokenize(question: &str, dict: &Dictionaries) -> Vec<SemanticToken> {
    let len = question.len();
    let mut taken = vec![false; len];
    let mut tokens: BTreeMap<usize, SemanticToken> = BTreeMap::new();

    let chart_hints = chart_hint_dict();
    let sort_cues = sort_cue_dict();
    let passes: [&[DictEntry]; 5] = [
        &dict.time_rules,
        &dict.business_terms,
        &dict.field_mappings,
        &chart_hints,
        &sort_cues,
    ];

    let boundaries: Vec<usize> = question.char_indices().map(|(i, _)| i).chain(std::iter::once(len)).collect();

    for pass in passes {
        for window in boundaries.windows(2) {
            let start = window[0];
            if taken[start] {
                continue;
            }
            for entry in pass {
                let end = start + entry.keyword.len();
                if end > len || taken[start..end].iter().any(|t| *t) {
                    continue;
                }
                if !question.is_char_boundary(end) {
                    continue;
                }
                if &question[start..end] == entry.keyword {
                    for slot in taken.iter_mut().take(end).skip(start) {
                        *slot = true;
                    }
                    tokens.insert(
                        start,
                        SemanticToken {
                            start,
                            end,
                            text: entry.keyword.clone(),
                            token_type: entry.token_type,
                            knowledge: entry.knowledge.clone(),
                        },
                    );
                    break;
                }
            }
        }
    }

    // Fill non-whitespace gaps as `plain` tokens so every meaningful
    // substring is accounted for; pure whitespace is left as an untagged
    // gap between spans.
    let mut cursor = 0usize;
    let matched_starts: Vec<usize> = tokens.keys().copied().collect();
    let mut filled: Vec<SemanticToken> = Vec::new();
    for start in matched_starts {
        let token = tokens.remove(&start).unwrap();
        if cursor < start {
            push_plain_gap(question, cursor, start, &mut filled);
        }
        cursor = token.end;
        filled.push(token);
    }
    if cursor < len {
        push_plain_gap(question, cursor, len, &mut filled);
    }

    filled.sort_by_key(|t| t.start);
    filled
}

fn push_plain_gap(question: &str, start: usize, end: usize, out: &mut Vec<SemanticToken>) {
    let gap = &question[start..end];
    if gap.trim().is_empty() {
        return;
    }
    out.push(SemanticToken {
        start,
        end,
        text: gap.to_string(),
        token_type: TokenType::Plain,
        knowledge: None,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsql_core::testing::FakeLlmProvider;
    use chatsql_types::model::{FieldMapping, PromptVersion};
    use std::sync::Mutex as StdMutex;

    struct FakeKnowledgeStore {
        time_rules: Vec<TimeRule>,
        terms: Vec<BusinessTerm>,
        mappings: Vec<FieldMapping>,
        prompts: StdMutex<HashMap<String, PromptVersion>>,
    }

    #[async_trait::async_trait]
    impl KnowledgeStore for FakeKnowledgeStore {
        async fn list_time_rules(&self) -> Result<Vec<TimeRule>> {
            Ok(self.time_rules.clone())
        }
        async fn upsert_time_rule(&self, _rule: TimeRule) -> Result<()> {
            Ok(())
        }
        async fn list_business_terms(&self) -> Result<Vec<BusinessTerm>> {
            Ok(self.terms.clone())
        }
        async fn upsert_business_term(&self, _term: BusinessTerm) -> Result<()> {
            Ok(())
        }
        async fn list_field_mappings(&self) -> Result<Vec<FieldMapping>> {
            Ok(self.mappings.clone())
        }
        async fn upsert_field_mapping(&self, _mapping: FieldMapping) -> Result<()> {
            Ok(())
        }
        async fn get_prompt(&self, name: &str) -> Result<Option<PromptVersion>> {
            Ok(self.prompts.lock().unwrap().get(name).cloned())
        }
        async fn get_active_prompt(&self, name: &str) -> Result<Option<PromptVersion>> {
            Ok(self.prompts.lock().unwrap().get(name).cloned())
        }
        async fn put_prompt(&self, version: PromptVersion) -> Result<()> {
            self.prompts.lock().unwrap().insert(version.name.clone(), version);
            Ok(())
        }
        async fn activate_prompt(&self, _name: &str, _version: i32) -> Result<()> {
            Ok(())
        }
        async fn get_user_profile(&self, _user_id: &str) -> Result<Option<chatsql_types::model::UserProfile>> {
            Ok(None)
        }
        async fn put_user_profile(&self, _profile: chatsql_types::model::UserProfile) -> Result<()> {
            Ok(())
        }
        async fn append_query_history(&self, _entry: chatsql_types::model::QueryHistory) -> Result<()> {
            Ok(())
        }
        async fn recent_query_history(
            &self,
            _user_id: &str,
            _limit: usize,
        ) -> Result<Vec<chatsql_types::model::QueryHistory>> {
            Ok(Vec::new())
        }
        async fn top_k_qa_pairs(&self, _embedding: &[f32], _k: usize) -> Result<Vec<chatsql_types::model::QaPair>> {
            Ok(Vec::new())
        }
        async fn get_qa_pair(&self, _id: uuid::Uuid) -> Result<Option<chatsql_types::model::QaPair>> {
            Ok(None)
        }
        async fn put_qa_pair(&self, _pair: chatsql_types::model::QaPair) -> Result<()> {
            Ok(())
        }
        async fn delete_qa_pair(&self, _id: uuid::Uuid) -> Result<()> {
            Ok(())
        }
        async fn evictable_qa_pairs(&self) -> Result<Vec<chatsql_types::model::QaPair>> {
            Ok(Vec::new())
        }
        async fn high_score_qa_pairs(&self, _min_score: f64, _limit: usize) -> Result<Vec<chatsql_types::model::QaPair>> {
            Ok(Vec::new())
        }
    }

    fn fixture_store() -> Arc<FakeKnowledgeStore> {
        Arc::new(FakeKnowledgeStore {
            time_rules: vec![TimeRule {
                keyword: "上个月".to_string(),
                canonical_range: "previous_calendar_month".to_string(),
                priority: 10,
            }],
            terms: vec![
                BusinessTerm {
                    keyword: "销售额".to_string(),
                    term_type: BusinessTermType::Metric,
                    description: "total sales amount".to_string(),
                    priority: 10,
                },
                BusinessTerm {
                    keyword: "地区".to_string(),
                    term_type: BusinessTermType::Dimension,
                    description: "geographic region".to_string(),
                    priority: 10,
                },
            ],
            mappings: vec![FieldMapping {
                keyword: "销售额".to_string(),
                canonical_field: "revenue".to_string(),
                table_hint: Some("sales".to_string()),
                priority: 5,
            }],
            prompts: StdMutex::new(HashMap::new()),
        })
    }

    #[tokio::test]
    async fn tokenizer_prefers_compound_time_rule_over_constituents() {
        let store = fixture_store();
        let llm = Arc::new(FakeLlmProvider::new(vec![LlmTurn::Text("上个月各地区销售额".to_string())]));
        let analyzer = QueryAnalyzer::new(store, llm);
        analyzer.reload_dictionaries().await.unwrap();

        let ctx = UserContext {
            user_id: "u1".to_string(),
            last_turn_question: None,
            focus_dimensions: Vec::new(),
        };
        let analysis = analyzer.analyze("上个月各地区销售额", &ctx).await.unwrap();

        let time_token = analysis
            .semantic_tokens
            .iter()
            .find(|t| t.token_type == TokenType::TimeRule)
            .expect("expected a time-rule token");
        assert_eq!(time_token.text, "上个月");
    }

    #[tokio::test]
    async fn span_reconstruction_invariant_holds() {
        let store = fixture_store();
        let llm = Arc::new(FakeLlmProvider::new(vec![LlmTurn::Text("raw".to_string())]));
        let analyzer = QueryAnalyzer::new(store, llm);
        analyzer.reload_dictionaries().await.unwrap();

        let question = "上个月各地区销售额 变化趋势 如何";
        let ctx = UserContext::default();
        let analysis = analyzer.analyze(question, &ctx).await.unwrap();

        let mut tokens = analysis.semantic_tokens.clone();
        tokens.sort_by_key(|t| t.start);
        for pair in tokens.windows(2) {
            assert!(pair[0].end <= pair[1].start, "spans must not overlap");
        }
        for token in &tokens {
            assert_eq!(&question[token.start..token.end], token.text);
        }
    }

    #[tokio::test]
    async fn rewrite_falls_back_to_raw_question_on_llm_failure() {
        let store = fixture_store();
        let llm = Arc::new(FakeLlmProvider::new(Vec::new()));
        llm.fail_next_call();
        let analyzer = QueryAnalyzer::new(store, llm);
        analyzer.reload_dictionaries().await.unwrap();

        let ctx = UserContext::default();
        let analysis = analyzer.analyze("销售额", &ctx).await.unwrap();
        assert_eq!(analysis.rewritten_question, "销售额");
    }

    #[tokio::test]
    async fn table_candidate_matches_field_mapping_table_hint() {
        let store = fixture_store();
        let llm = Arc::new(FakeLlmProvider::new(vec![LlmTurn::Text("销售额趋势".to_string())]));
        let analyzer = QueryAnalyzer::new(store, llm);
        analyzer.reload_dictionaries().await.unwrap();

        let ctx = UserContext::default();
        let analysis = analyzer.analyze("销售额趋势", &ctx).await.unwrap();
        assert!(analysis.candidate_tables.iter().any(|c| c.table == "sales"));
    }

    #[test]
    fn fifo_cache_evicts_oldest_first() {
        let mut cache = FifoCache::new(2);
        cache.insert("a".to_string(), "1".to_string());
        cache.insert("b".to_string(), "2".to_string());
        cache.insert("c".to_string(), "3".to_string());
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b"), Some("2".to_string()));
        assert_eq!(cache.get("c"), Some("3".to_string()));
    }
}
