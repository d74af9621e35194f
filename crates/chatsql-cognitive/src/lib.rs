//! Cognitive components of the chatsql pipeline
//!
//! Implements C3–C7 and C9 of spec §2: the Query Analyzer, Few-Shot
//! Selector, Prompt Composer, Agent Loop, and RAG Learner, plus the
//! user-profile learner that feeds table selection and prompt
//! personalization.

pub mod agent;
pub mod analyzer;
pub mod fewshot;
pub mod learner;
pub mod profile;
pub mod prompt;

pub use agent::{AgentLoop, AgentRunResult};
pub use analyzer::{Analysis, QueryAnalyzer, UserContext};
pub use fewshot::{FewShotResult, FewShotSelector};
pub use learner::{LearnAction, RagLearner};
pub use profile::ProfileLearner;
pub use prompt::PromptComposer;
