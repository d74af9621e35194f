//! Core data model (spec §3)
//!
//! Conversations own Messages; Messages own ToolCallRecords; QAPairs are
//! independent. Cross-entity references are by identifier, never by
//! pointer graph, per the DESIGN NOTES §9 guidance on cyclic references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------
// Conversation / Message
// ---------------------------------------------------------------------

/// A conversation between one user and the system. Created on first user
/// message; never destroyed except by explicit delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub summary: Option<String>,
    pub source: String,
    pub error_flag: bool,
}

impl Conversation {
    pub fn new(user_id: impl Into<String>, source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            created_at: now,
            updated_at: now,
            summary: None,
            source: source.into(),
            error_flag: false,
        }
    }
}

/// Role of a message within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A single message. Immutable after the surrounding stream completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub extra: MessageExtra,
}

impl Message {
    pub fn new(conversation_id: Uuid, role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            role,
            text: text.into(),
            created_at: Utc::now(),
            extra: MessageExtra::default(),
        }
    }
}

/// Side structure carried by assistant messages: extracted SQL, the
/// tabular result reference, the chart hint, reasoning steps, semantic
/// tokens, selected tables, referenced knowledge, and debug info. A
/// closed struct rather than an untyped blob, per DESIGN NOTES §9.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageExtra {
    pub sql: Option<String>,
    pub result_file_hash: Option<String>,
    pub chart: Option<ChartDescriptor>,
    #[serde(default)]
    pub reasoning_steps: Vec<ReasoningStep>,
    #[serde(default)]
    pub semantic_tokens: Vec<SemanticToken>,
    #[serde(default)]
    pub selected_tables: Vec<TableCandidate>,
    #[serde(default)]
    pub knowledge_used: Vec<KnowledgeRef>,
    pub debug: Option<MessageDebugInfo>,
}

/// Debug footprint persisted alongside an assistant message: retrieval
/// counts and exemplar previews (spec §4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDebugInfo {
    pub rag_used: bool,
    pub rag_count: usize,
    pub memory_used: bool,
    pub memory_count: usize,
    #[serde(default)]
    pub exemplar_previews: Vec<String>,
    /// Set when a `run_sql` tool call was rejected by the SQL safeguard
    /// (spec §8 scenario 2).
    #[serde(default)]
    pub sql_rejected: bool,
    /// Set when the stream orchestrator observed a client disconnect and
    /// aborted the agent loop before a final answer was reached (spec
    /// §4.5 Cancellation).
    #[serde(default)]
    pub aborted: bool,
}

/// A user-visible progress record in the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub step: u32,
    pub status: ReasoningStepStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningStepStatus {
    Running,
    Done,
    Error,
}

// ---------------------------------------------------------------------
// Semantic tokens
// ---------------------------------------------------------------------

/// Type tag for a classified substring of the user's question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    TimeRule,
    Comparison,
    Term,
    FieldMapping,
    ChartHint,
    Metric,
    Dimension,
    Sort,
    Plain,
}

/// A classified substring `[start, end)` (byte offsets, always on char
/// boundaries) of the original question. Invariant: token spans never
/// overlap; their concatenation plus untagged gaps equals the original
/// question exactly (spec §3, §8 invariant 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticToken {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub token_type: TokenType,
    pub knowledge: Option<KnowledgePayload>,
}

/// Optional knowledge payload carried by a matched token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgePayload {
    pub description: String,
    pub canonical_value: String,
}

/// Reference to a knowledge entry used while answering a question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeRef {
    pub keyword: String,
    pub kind: KnowledgeKind,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeKind {
    TimeRule,
    BusinessTerm,
    FieldMapping,
}

// ---------------------------------------------------------------------
// Query plan (transient)
// ---------------------------------------------------------------------

/// A ranked candidate table with the reason it was selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCandidate {
    pub table: String,
    pub score: f64,
    pub reason: String,
}

/// The rewritten question, candidate tables, matched knowledge, ranked
/// exemplars, and composed system prompt for one request. Created
/// transiently; persisted only via its debug footprint on the assistant
/// `Message` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub rewritten_question: String,
    pub candidate_tables: Vec<TableCandidate>,
    pub knowledge: Vec<KnowledgeRef>,
    pub exemplars: Vec<Exemplar>,
    pub system_prompt: String,
}

/// A few-shot exemplar selected for a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exemplar {
    pub question: String,
    pub sql: String,
    pub source: ExemplarSource,
    pub similarity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExemplarSource {
    Rag,
    Memory,
}

// ---------------------------------------------------------------------
// Knowledge entries
// ---------------------------------------------------------------------

/// Shared shape for time rules, business terms, and field mappings:
/// unique by keyword, hot-reloaded into an in-process cache on change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeRule {
    pub keyword: String,
    pub canonical_range: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessTermType {
    Metric,
    Dimension,
    Filter,
    Entity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessTerm {
    pub keyword: String,
    pub term_type: BusinessTermType,
    pub description: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    pub keyword: String,
    pub canonical_field: String,
    pub table_hint: Option<String>,
    pub priority: i32,
}

// ---------------------------------------------------------------------
// Prompt versions
// ---------------------------------------------------------------------

/// `(name, version)` primary key; exactly one version active per `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptVersion {
    pub name: String,
    pub version: i32,
    pub body: String,
    pub is_active: bool,
}

// ---------------------------------------------------------------------
// User profile & history
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertiseLevel {
    Beginner,
    Intermediate,
    Expert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserGroup {
    Admin,
    Expert,
    User,
    Guest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Line,
    Bar,
    Pie,
    Scatter,
    Table,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub expertise: ExpertiseLevel,
    pub preferred_chart: Option<ChartType>,
    pub preferred_time_range: Option<String>,
    /// Up to five focus dimensions (spec §3).
    pub focus_dimensions: Vec<String>,
    pub group: UserGroup,
}

impl UserProfile {
    pub fn new_default(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            expertise: ExpertiseLevel::Beginner,
            preferred_chart: None,
            preferred_time_range: None,
            focus_dimensions: Vec::new(),
            group: UserGroup::Guest,
        }
    }

    /// Enforces the "up to five" invariant whenever dimensions are set.
    pub fn set_focus_dimensions(&mut self, mut dims: Vec<String>) {
        dims.truncate(5);
        self.focus_dimensions = dims;
    }
}

/// Append-only per-user record of each question asked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHistory {
    pub id: Uuid,
    pub user_id: String,
    pub raw_text: String,
    pub rewritten_text: String,
    pub detected_type: Option<String>,
    pub chart_type: Option<ChartType>,
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    pub time_range: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------
// RAG / QAPair
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaSource {
    Expert,
    Feedback,
    Auto,
}

/// One entry in the RAG corpus (spec §3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaPair {
    pub id: Uuid,
    pub question: String,
    pub sql: String,
    pub answer_preview: Option<String>,
    pub embedding: Vec<f32>,
    pub raw_score: f64,
    pub composite_score: f64,
    pub quality_score: f64,
    pub source: QaSource,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------
// Feedback
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserVote {
    Like,
    Dislike,
    None,
}

/// At most one current feedback row per conversation; history retained
/// as an append-only log in the store (spec §3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub conversation_id: Uuid,
    pub expert_rating: Option<u8>,
    pub user_vote: Option<UserVote>,
    pub llm_score: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: Uuid,
    pub message_id: Uuid,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub result_summary: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------
// Tool result shapes (spec §4.4)
// ---------------------------------------------------------------------

/// Result of a `run_sql` tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlResult {
    pub row_count: usize,
    pub columns: Vec<String>,
    pub file_hash: String,
    pub preview: Vec<Vec<serde_json::Value>>,
}

/// Result of a `visualize_data` tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartDescriptor {
    pub chart_type: ChartType,
    pub x_key: String,
    pub y_key: String,
    pub title: String,
}
