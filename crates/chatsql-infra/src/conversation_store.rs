//! sqlx-SQLite backed `ConversationStore` (spec §2 C8, §6 "Persisted layout")

use async_trait::async_trait;
use chatsql_core::provider::ExecutedSqlMemory;
use chatsql_core::ConversationStore;
use chatsql_types::model::{
    Conversation, Feedback, Message, MessageExtra, MessageRole, UserVote,
};
use chatsql_types::{ChatSqlError, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| ChatSqlError::Database(format!("failed to connect: {e}")))?;
        let store = Self { pool };
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let statements = [
            r#"CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                summary TEXT,
                source TEXT NOT NULL,
                error_flag INTEGER NOT NULL DEFAULT 0
            )"#,
            r#"CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                text TEXT NOT NULL,
                created_at TEXT NOT NULL,
                extra TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations (id)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS feedback_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                expert_rating INTEGER,
                user_vote TEXT,
                llm_score INTEGER,
                timestamp TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS feedback_current (
                conversation_id TEXT PRIMARY KEY,
                expert_rating INTEGER,
                user_vote TEXT,
                llm_score INTEGER,
                timestamp TEXT NOT NULL
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
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    }
}

fn parse_role(s: &str) -> MessageRole {
    match s {
        "assistant" => MessageRole::Assistant,
        "system" => MessageRole::System,
        _ => MessageRole::User,
    }
}

fn vote_str(v: UserVote) -> &'static str {
    match v {
        UserVote::Like => "like",
        UserVote::Dislike => "dislike",
        UserVote::None => "none",
    }
}

fn parse_vote(s: &str) -> UserVote {
    match s {
        "like" => UserVote::Like,
        "dislike" => UserVote::Dislike,
        _ => UserVote::None,
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| ChatSqlError::Internal(format!("bad timestamp {s}: {e}")))
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn create_conversation(&self, conversation: Conversation) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversations (id, user_id, created_at, updated_at, summary, source, error_flag)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(conversation.id.to_string())
        .bind(&conversation.user_id)
        .bind(conversation.created_at.to_rfc3339())
        .bind(conversation.updated_at.to_rfc3339())
        .bind(&conversation.summary)
        .bind(&conversation.source)
        .bind(conversation.error_flag as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, user_id, created_at, updated_at, summary, source, error_flag FROM conversations WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        row.map(row_to_conversation).transpose()
    }

    async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let rows = sqlx::query(
            "SELECT id, user_id, created_at, updated_at, summary, source, error_flag FROM conversations WHERE user_id = ? ORDER BY updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        rows.into_iter().map(row_to_conversation).collect()
    }

    async fn delete_conversation(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| ChatSqlError::Database(e.to_string()))?;
        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        tx.commit().await.map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(())
    }

    async fn mark_conversation_error(&self, id: Uuid, error: bool) -> Result<()> {
        sqlx::query("UPDATE conversations SET error_flag = ?, updated_at = ? WHERE id = ?")
            .bind(error as i64)
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(())
    }

    async fn persist_message(&self, message: Message) -> Result<()> {
        let extra_json = serde_json::to_string(&message.extra)?;
        let mut tx = self.pool.begin().await.map_err(|e| ChatSqlError::Database(e.to_string()))?;
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, text, created_at, extra) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(message.conversation_id.to_string())
        .bind(role_str(message.role))
        .bind(&message.text)
        .bind(message.created_at.to_rfc3339())
        .bind(extra_json)
        .execute(&mut *tx)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(message.conversation_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        tx.commit().await.map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(())
    }

    async fn load_transcript(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, text, created_at, extra FROM messages WHERE conversation_id = ? ORDER BY created_at ASC",
        )
        .bind(conversation_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        rows.into_iter()
            .map(|r| -> Result<Message> {
                let extra: MessageExtra = serde_json::from_str(&r.get::<String, _>("extra"))?;
                Ok(Message {
                    id: Uuid::parse_str(&r.get::<String, _>("id")).map_err(|e| ChatSqlError::Internal(e.to_string()))?,
                    conversation_id: Uuid::parse_str(&r.get::<String, _>("conversation_id"))
                        .map_err(|e| ChatSqlError::Internal(e.to_string()))?,
                    role: parse_role(&r.get::<String, _>("role")),
                    text: r.get("text"),
                    created_at: parse_timestamp(&r.get::<String, _>("created_at"))?,
                    extra,
                })
            })
            .collect()
    }

    async fn rate(&self, feedback: Feedback) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| ChatSqlError::Database(e.to_string()))?;
        sqlx::query(
            "INSERT INTO feedback_current (conversation_id, expert_rating, user_vote, llm_score, timestamp)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(conversation_id) DO UPDATE SET expert_rating = excluded.expert_rating,
                user_vote = excluded.user_vote, llm_score = excluded.llm_score, timestamp = excluded.timestamp",
        )
        .bind(feedback.conversation_id.to_string())
        .bind(feedback.expert_rating.map(|r| r as i64))
        .bind(feedback.user_vote.map(vote_str))
        .bind(feedback.llm_score.map(|s| s as i64))
        .bind(feedback.timestamp.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        sqlx::query(
            "INSERT INTO feedback_history (conversation_id, expert_rating, user_vote, llm_score, timestamp)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(feedback.conversation_id.to_string())
        .bind(feedback.expert_rating.map(|r| r as i64))
        .bind(feedback.user_vote.map(vote_str))
        .bind(feedback.llm_score.map(|s| s as i64))
        .bind(feedback.timestamp.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        tx.commit().await.map_err(|e| ChatSqlError::Database(e.to_string()))?;
        Ok(())
    }

    async fn current_feedback(&self, conversation_id: Uuid) -> Result<Option<Feedback>> {
        let row = sqlx::query(
            "SELECT conversation_id, expert_rating, user_vote, llm_score, timestamp FROM feedback_current WHERE conversation_id = ?",
        )
        .bind(conversation_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        row.map(row_to_feedback).transpose()
    }

    async fn feedback_history(&self, conversation_id: Uuid) -> Result<Vec<Feedback>> {
        let rows = sqlx::query(
            "SELECT conversation_id, expert_rating, user_vote, llm_score, timestamp FROM feedback_history WHERE conversation_id = ? ORDER BY timestamp ASC",
        )
        .bind(conversation_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;
        rows.into_iter().map(row_to_feedback).collect()
    }

    async fn recent_successful_sql(&self, user_id: &str, limit: usize) -> Result<Vec<ExecutedSqlMemory>> {
        // Successful run_sql tool calls are recovered from persisted
        // assistant messages whose extra.sql is set and whose debug block
        // does not carry a rejection flag (spec §4.2 "user execution
        // memory").
        let rows = sqlx::query(
            "SELECT m.text, m.extra, m.created_at FROM messages m
             JOIN conversations c ON c.id = m.conversation_id
             WHERE c.user_id = ? AND m.role = 'assistant' AND json_extract(m.extra, '$.sql') IS NOT NULL
             ORDER BY m.created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ChatSqlError::Database(e.to_string()))?;

        rows.into_iter()
            .map(|r| -> Result<ExecutedSqlMemory> {
                let extra: MessageExtra = serde_json::from_str(&r.get::<String, _>("extra"))?;
                Ok(ExecutedSqlMemory {
                    question: r.get("text"),
                    sql: extra.sql.unwrap_or_default(),
                    executed_at: parse_timestamp(&r.get::<String, _>("created_at"))?,
                })
            })
            .collect()
    }
}

fn row_to_conversation(r: sqlx::sqlite::SqliteRow) -> Result<Conversation> {
    Ok(Conversation {
        id: Uuid::parse_str(&r.get::<String, _>("id")).map_err(|e| ChatSqlError::Internal(e.to_string()))?,
        user_id: r.get("user_id"),
        created_at: parse_timestamp(&r.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp(&r.get::<String, _>("updated_at"))?,
        summary: r.get("summary"),
        source: r.get("source"),
        error_flag: r.get::<i64, _>("error_flag") != 0,
    })
}

fn row_to_feedback(r: sqlx::sqlite::SqliteRow) -> Result<Feedback> {
    Ok(Feedback {
        conversation_id: Uuid::parse_str(&r.get::<String, _>("conversation_id"))
            .map_err(|e| ChatSqlError::Internal(e.to_string()))?,
        expert_rating: r.get::<Option<i64>, _>("expert_rating").map(|v| v as u8),
        user_vote: r.get::<Option<String>, _>("user_vote").map(|s| parse_vote(&s)),
        llm_score: r.get::<Option<i64>, _>("llm_score").map(|v| v as u8),
        timestamp: parse_timestamp(&r.get::<String, _>("timestamp"))?,
    })
}
