//! User-profile learner: aggregates recent query history into the
//! `UserProfile` the Query Analyzer and Prompt Composer read back (spec
//! §3 UserProfile note: "Updated by a learner that aggregates recent
//! QueryHistory entries"). Grounded on the teacher's pattern of deriving
//! profile-like state from a rolling window of past interactions rather
//! than a single event (`brain-cognitive::learning::BehavioralLearner`).

use std::sync::Arc;

use chatsql_core::KnowledgeStore;
use chatsql_types::model::{ChartType, ExpertiseLevel, QueryHistory, UserProfile};
use chatsql_types::Result;

/// How many recent questions inform a single profile update.
const HISTORY_WINDOW: usize = 50;

/// Minimum history volume to call a user "intermediate" or "expert".
/// Chosen so a handful of one-off questions never promotes a user past
/// beginner defaults; revisit if usage patterns show this is too slow.
const INTERMEDIATE_FLOOR: usize = 10;
const EXPERT_FLOOR: usize = 30;

const MAX_FOCUS_DIMENSIONS: usize = 5;

pub struct ProfileLearner {
    knowledge: Arc<dyn KnowledgeStore>,
}

impl ProfileLearner {
    pub fn new(knowledge: Arc<dyn KnowledgeStore>) -> Self {
        Self { knowledge }
    }

    /// Recomputes and persists `user_id`'s profile from its recent
    /// history. Returns the updated profile; a user with no history yet
    /// gets (and keeps) the default profile untouched.
    pub async fn update_profile(&self, user_id: &str) -> Result<UserProfile> {
        let mut profile = self
            .knowledge
            .get_user_profile(user_id)
            .await?
            .unwrap_or_else(|| UserProfile::new_default(user_id));

        let history = self.knowledge.recent_query_history(user_id, HISTORY_WINDOW).await?;
        if history.is_empty() {
            return Ok(profile);
        }

        profile.expertise = escalate_expertise(profile.expertise, history.len());
        if let Some(chart) = mode_chart_type(&history) {
            profile.preferred_chart = Some(chart);
        }
        if let Some(time_range) = mode_time_range(&history) {
            profile.preferred_time_range = Some(time_range);
        }
        profile.set_focus_dimensions(top_dimensions(&history, MAX_FOCUS_DIMENSIONS));

        self.knowledge.put_user_profile(profile.clone()).await?;
        Ok(profile)
    }
}

/// Never downgrades an expertise level a user already earned (or an
/// admin assigned), only raises it as history volume grows.
fn escalate_expertise(current: ExpertiseLevel, history_len: usize) -> ExpertiseLevel {
    let derived = if history_len >= EXPERT_FLOOR {
        ExpertiseLevel::Expert
    } else if history_len >= INTERMEDIATE_FLOOR {
        ExpertiseLevel::Intermediate
    } else {
        ExpertiseLevel::Beginner
    };
    if expertise_rank(derived) > expertise_rank(current) {
        derived
    } else {
        current
    }
}

fn expertise_rank(level: ExpertiseLevel) -> u8 {
    match level {
        ExpertiseLevel::Beginner => 0,
        ExpertiseLevel::Intermediate => 1,
        ExpertiseLevel::Expert => 2,
    }
}

/// Most frequent non-null chart type, ties broken by first occurrence in
/// the (already most-recent-first) history slice.
fn mode_chart_type(history: &[QueryHistory]) -> Option<ChartType> {
    let mut counts: Vec<(ChartType, u32)> = Vec::new();
    for entry in history {
        let Some(chart) = entry.chart_type else { continue };
        match counts.iter_mut().find(|(c, _)| *c == chart) {
            Some((_, n)) => *n += 1,
            None => counts.push((chart, 1)),
        }
    }
    counts.into_iter().max_by_key(|(_, n)| *n).map(|(c, _)| c)
}

fn mode_time_range(history: &[QueryHistory]) -> Option<String> {
    let mut counts: Vec<(&str, u32)> = Vec::new();
    for entry in history {
        let Some(range) = entry.time_range.as_deref() else { continue };
        match counts.iter_mut().find(|(r, _)| *r == range) {
            Some((_, n)) => *n += 1,
            None => counts.push((range, 1)),
        }
    }
    counts.into_iter().max_by_key(|(_, n)| *n).map(|(r, _)| r.to_string())
}

/// Ranks dimensions by mention frequency across history, breaking ties
/// by first appearance, and returns the top `limit`.
fn top_dimensions(history: &[QueryHistory], limit: usize) -> Vec<String> {
    let mut counts: Vec<(String, u32)> = Vec::new();
    for entry in history {
        for dim in &entry.dimensions {
            match counts.iter_mut().find(|(d, _)| d == dim) {
                Some((_, n)) => *n += 1,
                None => counts.push((dim.clone(), 1)),
            }
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().take(limit).map(|(d, _)| d).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatsql_types::model::{
        BusinessTerm, FieldMapping, PromptVersion, QaPair, TimeRule, UserGroup,
    };
    use chrono::Utc;
    use uuid::Uuid;

    struct StubKnowledgeStore {
        profile: std::sync::Mutex<Option<UserProfile>>,
        history: Vec<QueryHistory>,
        put_calls: std::sync::Mutex<Vec<UserProfile>>,
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
            Ok(self.profile.lock().unwrap().clone())
        }
        async fn put_user_profile(&self, profile: UserProfile) -> Result<()> {
            self.put_calls.lock().unwrap().push(profile);
            Ok(())
        }
        async fn append_query_history(&self, _entry: QueryHistory) -> Result<()> {
            Ok(())
        }
        async fn recent_query_history(&self, _user_id: &str, _limit: usize) -> Result<Vec<QueryHistory>> {
            Ok(self.history.clone())
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

    fn history_entry(dims: &[&str], chart: Option<ChartType>, time_range: Option<&str>) -> QueryHistory {
        QueryHistory {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            raw_text: "question".to_string(),
            rewritten_text: "question".to_string(),
            detected_type: None,
            chart_type: chart,
            dimensions: dims.iter().map(|d| d.to_string()).collect(),
            metrics: Vec::new(),
            time_range: time_range.map(|t| t.to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn leaves_default_profile_untouched_with_no_history() {
        let store = Arc::new(StubKnowledgeStore {
            profile: std::sync::Mutex::new(None),
            history: Vec::new(),
            put_calls: std::sync::Mutex::new(Vec::new()),
        });
        let learner = ProfileLearner::new(store.clone());
        let profile = learner.update_profile("u1").await.unwrap();
        assert_eq!(profile.expertise, ExpertiseLevel::Beginner);
        assert!(store.put_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn caps_focus_dimensions_at_five_ranked_by_frequency() {
        let history = vec![
            history_entry(&["region", "revenue"], Some(ChartType::Bar), Some("last_30_days")),
            history_entry(&["region", "product"], Some(ChartType::Bar), Some("last_30_days")),
            history_entry(&["region", "channel"], Some(ChartType::Line), None),
            history_entry(&["category"], None, None),
            history_entry(&["segment"], None, None),
            history_entry(&["cohort"], None, None),
        ];
        let store = Arc::new(StubKnowledgeStore {
            profile: std::sync::Mutex::new(None),
            history,
            put_calls: std::sync::Mutex::new(Vec::new()),
        });
        let learner = ProfileLearner::new(store.clone());
        let profile = learner.update_profile("u1").await.unwrap();

        assert_eq!(profile.focus_dimensions.len(), 5);
        assert_eq!(profile.focus_dimensions[0], "region");
        assert_eq!(profile.preferred_chart, Some(ChartType::Bar));
        assert_eq!(profile.preferred_time_range.as_deref(), Some("last_30_days"));
        assert_eq!(store.put_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn never_downgrades_an_already_expert_user() {
        let mut existing = UserProfile::new_default("u1");
        existing.expertise = ExpertiseLevel::Expert;
        existing.group = UserGroup::Expert;

        let store = Arc::new(StubKnowledgeStore {
            profile: std::sync::Mutex::new(Some(existing)),
            history: vec![history_entry(&["region"], None, None)],
            put_calls: std::sync::Mutex::new(Vec::new()),
        });
        let learner = ProfileLearner::new(store);
        let profile = learner.update_profile("u1").await.unwrap();
        assert_eq!(profile.expertise, ExpertiseLevel::Expert);
    }
}
