//! Shared application state, assembled once at startup and handed to
//! every request handler by reference (SPEC_FULL §9 "Global process
//! state → dependency-injected collaborators"). Grounded on the
//! teacher's `AppState`-style single struct threaded through
//! `brain-api::web_server` handlers, rather than module-level statics.

use std::sync::Arc;

use chatsql_cognitive::{AgentLoop, FewShotSelector, ProfileLearner, PromptComposer, QueryAnalyzer, RagLearner};
use chatsql_core::{ArtifactStore, ConversationStore, Embedder, KnowledgeStore, LLMProvider, QueryExecutor};
use chatsql_types::config::AppConfig;

use crate::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState(pub Arc<Inner>);

pub struct Inner {
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub embedder: Arc<dyn Embedder>,
    pub analyzer: QueryAnalyzer,
    pub fewshot: FewShotSelector,
    pub prompt: PromptComposer,
    pub agent: AgentLoop,
    pub learner: RagLearner,
    pub profile_learner: ProfileLearner,
    pub rate_limiter: RateLimiter,
    pub config: AppConfig,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        knowledge: Arc<dyn KnowledgeStore>,
        conversations: Arc<dyn ConversationStore>,
        artifacts: Arc<dyn ArtifactStore>,
        llm: Arc<dyn LLMProvider>,
        embedder: Arc<dyn Embedder>,
        executor: Arc<dyn QueryExecutor>,
        config: AppConfig,
    ) -> Self {
        let analyzer = QueryAnalyzer::new(knowledge.clone(), llm.clone());
        let fewshot = FewShotSelector::new(knowledge.clone(), conversations.clone(), embedder.clone());
        let prompt = PromptComposer::new(knowledge.clone());
        let agent = AgentLoop::new(
            llm.clone(),
            executor,
            artifacts.clone(),
            config.agent.max_iterations,
            std::time::Duration::from_secs(config.agent.deadline_seconds),
        );
        let learner = RagLearner::new(knowledge.clone(), embedder.clone());
        let profile_learner = ProfileLearner::new(knowledge.clone());
        let rate_limiter = RateLimiter::new();

        Self(Arc::new(Inner {
            knowledge,
            conversations,
            artifacts,
            embedder,
            analyzer,
            fewshot,
            prompt,
            agent,
            learner,
            profile_learner,
            rate_limiter,
            config,
        }))
    }
}

impl std::ops::Deref for AppState {
    type Target = Inner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
