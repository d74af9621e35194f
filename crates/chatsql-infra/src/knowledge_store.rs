//! sqlx-SQLite backed `KnowledgeStore` (spec §2 C1, §6 "Persisted layout")
//!
//! One pool, one table per logical entity, matching the teacher's
//! `DatabaseManager::initialize_schema` (`brain-infra::database`). Uses the
//! runtime `sqlx::query`/`query_as` API (no compile-time `query!` macro)
//! since no database is available at build time.

use async_trait::async_trait;
use chatsql_core::KnowledgeStore;
use chatsql_types::model::{
    BusinessTerm, BusinessTermType, FieldMapping, PromptVersion, QaPair, QaSource, TimeRule,
    UserProfile, UserGroup, ExpertiseLevel, ChartType, QueryHistory,
};
use chatsql_types::{ChatSqlError, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub struct SqliteKnowledgeStore {
    pool: SqlitePool,
}

impl SqliteKnowledgeStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| ChatSqlError::Database(format!("failed to connect: {e}")))?;
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn initialize_schema(&self) -> Result<()> {
        let statements = [
            r#"CREATE TABLE IF NOT EXISTS time_rules (
                keyword TEXT PRIMARY KEY,
                canonical_range TEXT NOT NULL,
                priority INTEGER NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS business_terms (
                keyword TEXT PRIMARY KEY,
                term_type TEXT NOT NULL,
                description TEXT NOT NULL,
                priority INTEGER NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS field_mappings (
                keyword TEXT PRIMARY KEY,
                canonical_field TEXT NOT NULL,
                table_hint TEXT,
                priority INTEGER NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS prompt_versions (
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                body TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (name, version)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS user_profiles (
                user_id TEXT PRIMARY KEY,
                expertise TEXT NOT NULL,
                preferred_chart TEXT,
                preferred_time_range TEXT,
                focus_dimensions TEXT NOT NULL,
                user_group TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS query_history (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                raw_text TEXT NOT NULL,
                rewritten_text TEXT NOT NULL,
                detected_type TEXT,
                chart_type TEXT,
                dimensions TEXT NOT NULL,
                metrics TEXT NOT NULL,
                time_range TEXT,
                created_at TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS qa_pairs (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                sql TEXT NOT NULL,
                answer_preview TEXT,
                embedding TEXT NOT NULL,
                raw_score REAL NOT NULL,
                composite_score REAL NOT NULL,
                quality_score REAL NOT NULL,
                source TEXT NOT NULL,
                tags TEXT NOT NULL,
                category TEXT,
                usage_count INTEGER NOT NULL,
                last_used_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
        ];
        for stmt in statements {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| ChatSqlError::Database(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> Result<bool> {
        let row = sqlx::query("SELECT 1 as ok")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ChatSqlError::Database(format!("health check failed: {e}")))?;
        let value: i64 = row.get("ok");
        Ok(value == 1)
    }
}

fn term_type_str(t: BusinessTermType) -> &'static str {
    match t {
        BusinessTermType::Metric => "metric",
        BusinessTermType::Dimension => "dimension",
        BusinessTermType::Filter => "filter",
        BusinessTermType::Entity => "entity",
    }
}

fn parse_term_type(s: &str) -> BusinessTermType {
    match s {
        "metric" => BusinessTermType::Metric,
        "dimension" => BusinessTermType::Dimension,
        "filter" => BusinessTermType::Filter,
        _ => BusinessTermType::Entity,
    }
}

fn group_str(g: UserGroup) -> &'static str {
    match g {
        UserGroup::Admin => "admin",
        UserGroup::Expert => "expert",
        UserGroup::User => "user",
        UserGroup::Guest => "guest",
    }
}

fn parse_group(s: &str) -> UserGroup {
    match s {
        "admin" => UserGroup::Admin,
        "expert" => UserGroup::Expert,
        "user" => UserGroup::User,
        _ => UserGroup::Guest,
    }
}

fn expertise_str(e: ExpertiseLevel) -> &'static str {
    match e {
        ExpertiseLevel::Beginner => "beginner",
        ExpertiseLevel::Intermediate => "intermediate",
        ExpertiseLevel::Expert => "expert",
    }
}

fn parse_expertise(s: &str) -> ExpertiseLevel {
    match s {
        "intermediate" => ExpertiseLevel::Intermediate,
        "expert" => ExpertiseLevel::Expert,
        _ => ExpertiseLevel::Beginner,
    }
}

fn chart_str(c: ChartType) -> &'static str {
    match c {
        ChartType::Line => "line",
        ChartType::Bar => "bar",
        ChartType::Pie => "pie",
        ChartType::Scatter => "scatter",
        ChartType::Table => "table",
    }
}

fn parse_chart(s: &str) -> Option<ChartType> {
    match s {
        "line" => Some(ChartType::Line),
        "bar" => Some(ChartType::Bar),
        "pie" => Some(ChartType::Pie),
        "scatter" => Some(ChartType::Scatter),
        "table" => Some(ChartType::Table),
        _ => None,
    }
}

fn source_str(s: QaSource) -> &'static str {
    match s {
        QaSource::Expert => "expert",
        QaSource::Feedback => "feedback",
        QaSource::Auto => "auto",
    }
}

fn parse_source(s: &str) -> QaSource {
    match s {
        "expert" => QaSource::Expert,
        "feedback" => QaSource::Feedback,
        _ => QaSource::Auto,
    }
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn list_time_rules(&self) -> Result<Vec<TimeRule>> {
        let rows = sqlx::query("SELECT keyword, canonical_range, priority FROM time_rules")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|r| TimeRule {
                keyword: r.get("keyword"),
                canonical_range: r.get("canonical_range"),
                priority: r.get("priority"),
            })
            .collect())
    }

    async fn upsert_time_rule(&self, rule: TimeRule) -> Result<()> {
        sqlx::query(
            "INSERT INTO time_rules (keyword, canonical_range, priority) VALUES (?, ?, ?)
             ON CONFLICT(keyword) DO UPDATE SET canonical_range = excluded.canonical_range, priority = excluded.priority",
        )
        .bind(&rule.keyword)
        .bind(&rule.canonical_range)
        .bind(rule.priority)
        .execute(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(())
    }

    async fn list_business_terms(&self) -> Result<Vec<BusinessTerm>> {
        let rows = sqlx::query("SELECT keyword, term_type, description, priority FROM business_terms")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|r| BusinessTerm {
                keyword: r.get("keyword"),
                term_type: parse_term_type(&r.get::<String, _>("term_type")),
                description: r.get("description"),
                priority: r.get("priority"),
            })
            .collect())
    }

    async fn upsert_business_term(&self, term: BusinessTerm) -> Result<()> {
        sqlx::query(
            "INSERT INTO business_terms (keyword, term_type, description, priority) VALUES (?, ?, ?, ?)
             ON CONFLICT(keyword) DO UPDATE SET term_type = excluded.term_type, description = excluded.description, priority = excluded.priority",
        )
        .bind(&term.keyword)
        .bind(term_type_str(term.term_type))
        .bind(&term.description)
        .bind(term.priority)
        .execute(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(())
    }

    async fn list_field_mappings(&self) -> Result<Vec<FieldMapping>> {
        let rows = sqlx::query("SELECT keyword, canonical_field, table_hint, priority FROM field_mappings")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|r| FieldMapping {
                keyword: r.get("keyword"),
                canonical_field: r.get("canonical_field"),
                table_hint: r.get("table_hint"),
                priority: r.get("priority"),
            })
            .collect())
    }

    async fn upsert_field_mapping(&self, mapping: FieldMapping) -> Result<()> {
        sqlx::query(
            "INSERT INTO field_mappings (keyword, canonical_field, table_hint, priority) VALUES (?, ?, ?, ?)
             ON CONFLICT(keyword) DO UPDATE SET canonical_field = excluded.canonical_field, table_hint = excluded.table_hint, priority = excluded.priority",
        )
        .bind(&mapping.keyword)
        .bind(&mapping.canonical_field)
        .bind(&mapping.table_hint)
        .bind(mapping.priority)
        .execute(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_prompt(&self, name: &str) -> Result<Option<PromptVersion>> {
        let row = sqlx::query(
            "SELECT name, version, body, is_active FROM prompt_versions WHERE name = ? ORDER BY version DESC LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(row.map(|r| PromptVersion {
            name: r.get("name"),
            version: r.get("version"),
            body: r.get("body"),
            is_active: r.get::<i64, _>("is_active") != 0,
        }))
    }

    async fn get_active_prompt(&self, name: &str) -> Result<Option<PromptVersion>> {
        let row = sqlx::query(
            "SELECT name, version, body, is_active FROM prompt_versions WHERE name = ? AND is_active = 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(row.map(|r| PromptVersion {
            name: r.get("name"),
            version: r.get("version"),
            body: r.get("body"),
            is_active: true,
        }))
    }

    async fn put_prompt(&self, version: PromptVersion) -> Result<()> {
        sqlx::query(
            "INSERT INTO prompt_versions (name, version, body, is_active) VALUES (?, ?, ?, ?)
             ON CONFLICT(name, version) DO UPDATE SET body = excluded.body",
        )
        .bind(&version.name)
        .bind(version.version)
        .bind(&version.body)
        .bind(version.is_active as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(())
    }

    async fn activate_prompt(&self, name: &str, version: i32) -> Result<()> {
        // Single-writer transaction keeps the "exactly one active per
        // name" invariant atomic (spec §8 invariant 3).
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        sqlx::query("UPDATE prompt_versions SET is_active = 0 WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        let affected = sqlx::query("UPDATE prompt_versions SET is_active = 1 WHERE name = ? AND version = ?")
            .bind(name)
            .bind(version)
            .execute(&mut *tx)
            .await
            .map_err(|e| ChatSqlError::Database(e.to_string()))?
            .rows_affected();
        if affected == 0 {
            tx.rollback()
                .await
                .map_err(|e| ChatSqlError::Database(e.to_string()))?;
            return Err(ChatSqlError::NotFound(format!(
                "prompt version {name}/{version} not found"
            )));
        }
        tx.commit()
            .await
            .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_user_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let row = sqlx::query(
            "SELECT user_id, expertise, preferred_chart, preferred_time_range, focus_dimensions, user_group FROM user_profiles WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(row.map(|r| {
            let dims_json: String = r.get("focus_dimensions");
            UserProfile {
                user_id: r.get("user_id"),
                expertise: parse_expertise(&r.get::<String, _>("expertise")),
                preferred_chart: r
                    .get::<Option<String>, _>("preferred_chart")
                    .and_then(|s| parse_chart(&s)),
                preferred_time_range: r.get("preferred_time_range"),
                focus_dimensions: serde_json::from_str(&dims_json).unwrap_or_default(),
                group: parse_group(&r.get::<String, _>("user_group")),
            }
        }))
    }

    async fn put_user_profile(&self, profile: UserProfile) -> Result<()> {
        let dims_json = serde_json::to_string(&profile.focus_dimensions)?;
        sqlx::query(
            "INSERT INTO user_profiles (user_id, expertise, preferred_chart, preferred_time_range, focus_dimensions, user_group)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET expertise = excluded.expertise, preferred_chart = excluded.preferred_chart,
                preferred_time_range = excluded.preferred_time_range, focus_dimensions = excluded.focus_dimensions, user_group = excluded.user_group",
        )
        .bind(&profile.user_id)
        .bind(expertise_str(profile.expertise))
        .bind(profile.preferred_chart.map(chart_str))
        .bind(&profile.preferred_time_range)
        .bind(dims_json)
        .bind(group_str(profile.group))
        .execute(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(())
    }

    async fn append_query_history(&self, entry: QueryHistory) -> Result<()> {
        sqlx::query(
            "INSERT INTO query_history (id, user_id, raw_text, rewritten_text, detected_type, chart_type, dimensions, metrics, time_range, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(&entry.user_id)
        .bind(&entry.raw_text)
        .bind(&entry.rewritten_text)
        .bind(&entry.detected_type)
        .bind(entry.chart_type.map(chart_str))
        .bind(serde_json::to_string(&entry.dimensions)?)
        .bind(serde_json::to_string(&entry.metrics)?)
        .bind(&entry.time_range)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(())
    }

    async fn recent_query_history(&self, user_id: &str, limit: usize) -> Result<Vec<QueryHistory>> {
        let rows = sqlx::query(
            "SELECT id, user_id, raw_text, rewritten_text, detected_type, chart_type, dimensions, metrics, time_range, created_at
             FROM query_history WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        rows.into_iter()
            .map(|r| -> Result<QueryHistory> {
                Ok(QueryHistory {
                    id: Uuid::parse_str(&r.get::<String, _>("id"))
                        .map_err(|e| ChatSqlError::Internal(e.to_string()))?,
                    user_id: r.get("user_id"),
                    raw_text: r.get("raw_text"),
                    rewritten_text: r.get("rewritten_text"),
                    detected_type: r.get("detected_type"),
                    chart_type: r
                        .get::<Option<String>, _>("chart_type")
                        .and_then(|s| parse_chart(&s)),
                    dimensions: serde_json::from_str(&r.get::<String, _>("dimensions"))?,
                    metrics: serde_json::from_str(&r.get::<String, _>("metrics"))?,
                    time_range: r.get("time_range"),
                    created_at: parse_timestamp(&r.get::<String, _>("created_at"))?,
                })
            })
            .collect()
    }

    async fn top_k_qa_pairs(&self, embedding: &[f32], k: usize) -> Result<Vec<QaPair>> {
        // The corpus is small enough (bounded by the eviction sweep, spec
        // §4.7) that scanning and ranking in-process is simpler and more
        // transparent than a vector extension; this mirrors the teacher's
        // preference for lightweight, dependency-light storage.
        let rows = sqlx::query(
            "SELECT id, question, sql, answer_preview, embedding, raw_score, composite_score, quality_score,
                    source, tags, category, usage_count, last_used_at, created_at, updated_at FROM qa_pairs",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;

        let mut scored: Vec<(f64, QaPair)> = rows
            .into_iter()
            .map(row_to_qa_pair)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .map(|pair| (chatsql_core::provider::cosine_similarity(embedding, &pair.embedding), pair))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(k).map(|(_, p)| p).collect())
    }

    async fn get_qa_pair(&self, id: Uuid) -> Result<Option<QaPair>> {
        let row = sqlx::query(
            "SELECT id, question, sql, answer_preview, embedding, raw_score, composite_score, quality_score,
                    source, tags, category, usage_count, last_used_at, created_at, updated_at FROM qa_pairs WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        row.map(row_to_qa_pair).transpose()
    }

    async fn put_qa_pair(&self, pair: QaPair) -> Result<()> {
        sqlx::query(
            "INSERT INTO qa_pairs (id, question, sql, answer_preview, embedding, raw_score, composite_score, quality_score,
                source, tags, category, usage_count, last_used_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET question = excluded.question, sql = excluded.sql,
                answer_preview = excluded.answer_preview, embedding = excluded.embedding,
                raw_score = excluded.raw_score, composite_score = excluded.composite_score,
                quality_score = excluded.quality_score, source = excluded.source, tags = excluded.tags,
                category = excluded.category, usage_count = excluded.usage_count,
                last_used_at = excluded.last_used_at, updated_at = excluded.updated_at",
        )
        .bind(pair.id.to_string())
        .bind(&pair.question)
        .bind(&pair.sql)
        .bind(&pair.answer_preview)
        .bind(serde_json::to_string(&pair.embedding)?)
        .bind(pair.raw_score)
        .bind(pair.composite_score)
        .bind(pair.quality_score)
        .bind(source_str(pair.source))
        .bind(serde_json::to_string(&pair.tags)?)
        .bind(&pair.category)
        .bind(pair.usage_count as i64)
        .bind(pair.last_used_at.map(|t| t.to_rfc3339()))
        .bind(pair.created_at.to_rfc3339())
        .bind(pair.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(())
    }

    async fn delete_qa_pair(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM qa_pairs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(())
    }

    async fn evictable_qa_pairs(&self) -> Result<Vec<QaPair>> {
        let cutoff = (Utc::now() - chrono::Duration::days(30)).to_rfc3339();
        let rows = sqlx::query(
            "SELECT id, question, sql, answer_preview, embedding, raw_score, composite_score, quality_score,
                    source, tags, category, usage_count, last_used_at, created_at, updated_at FROM qa_pairs
             WHERE composite_score < 3.0 AND usage_count = 0 AND created_at < ?",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        rows.into_iter().map(row_to_qa_pair).collect()
    }

    async fn high_score_qa_pairs(&self, min_score: f64, limit: usize) -> Result<Vec<QaPair>> {
        let rows = sqlx::query(
            "SELECT id, question, sql, answer_preview, embedding, raw_score, composite_score, quality_score,
                    source, tags, category, usage_count, last_used_at, created_at, updated_at FROM qa_pairs
             WHERE composite_score >= ? ORDER BY composite_score DESC LIMIT ?",
        )
        .bind(min_score)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        rows.into_iter().map(row_to_qa_pair).collect()
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| ChatSqlError::Internal(format!("bad timestamp {s}: {e}")))
}

fn row_to_qa_pair(r: sqlx::sqlite::SqliteRow) -> Result<QaPair> {
    Ok(QaPair {
        id: Uuid::parse_str(&r.get::<String, _>("id")).map_err(|e| ChatSqlError::Internal(e.to_string()))?,
        question: r.get("question"),
        sql: r.get("sql"),
        answer_preview: r.get("answer_preview"),
        embedding: serde_json::from_str(&r.get::<String, _>("embedding"))?,
        raw_score: r.get("raw_score"),
        composite_score: r.get("composite_score"),
        quality_score: r.get("quality_score"),
        source: parse_source(&r.get::<String, _>("source")),
        tags: serde_json::from_str(&r.get::<String, _>("tags"))?,
        category: r.get("category"),
        usage_count: r.get::<i64, _>("usage_count") as u64,
        last_used_at: r
            .get::<Option<String>, _>("last_used_at")
            .map(|s| parse_timestamp(&s))
            .transpose()?,
        created_at: parse_timestamp(&r.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp(&r.get::<String, _>("updated_at"))?,
    })
}
