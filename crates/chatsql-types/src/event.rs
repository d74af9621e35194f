//! Streaming event model (spec §4.5, §6)
//!
//! A closed sum type for event kinds; the serialization boundary is
//! permissive on unknown fields within a payload but rejects unknown
//! event kinds, per DESIGN NOTES §9.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{ChartDescriptor, MessageDebugInfo, ReasoningStepStatus, SqlResult};

/// One server-sent event. Serializes to the wire shape of spec §6:
/// `{ conversationId?, rich?, simple?, dedupKey? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "conversationId", skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rich: Option<RichPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simple: Option<SimplePayload>,
    #[serde(rename = "dedupKey", skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimplePayload {
    pub text: String,
}

/// Structured payload kinds, tagged by `type` with data under `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RichPayload {
    ReasoningStep {
        step: u32,
        status: ReasoningStepStatus,
        message: String,
    },
    ToolCall {
        tool: String,
        arguments: serde_json::Value,
        success: bool,
        summary: String,
    },
    Dataframe {
        file_hash: String,
        row_count: usize,
        columns: Vec<String>,
        preview: Vec<Vec<serde_json::Value>>,
    },
    Chart {
        chart: ChartDescriptor,
    },
    Error {
        kind: String,
        message: String,
    },
    StatusCard {
        title: String,
        body: String,
    },
}

/// The total-ordered event kind discriminant used internally by the
/// orchestrator to enforce the ordering invariants of spec §4.5/§8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ConversationId,
    ReasoningStep,
    TextDelta,
    ToolCall,
    Dataframe,
    Chart,
    Error,
    Done,
}

impl StreamEvent {
    pub fn conversation_id(id: Uuid) -> Self {
        Self {
            conversation_id: Some(id),
            rich: None,
            simple: None,
            dedup_key: None,
        }
    }

    pub fn text_delta(text: impl Into<String>) -> Self {
        let text = text.into();
        let dedup_key = dedup_key_for(&text);
        Self {
            conversation_id: None,
            rich: None,
            simple: Some(SimplePayload { text }),
            dedup_key: Some(dedup_key),
        }
    }

    pub fn reasoning_step(step: u32, status: ReasoningStepStatus, message: impl Into<String>) -> Self {
        Self {
            conversation_id: None,
            rich: Some(RichPayload::ReasoningStep {
                step,
                status,
                message: message.into(),
            }),
            simple: None,
            dedup_key: None,
        }
    }

    pub fn tool_call(tool: impl Into<String>, arguments: serde_json::Value, success: bool, summary: impl Into<String>) -> Self {
        Self {
            conversation_id: None,
            rich: Some(RichPayload::ToolCall {
                tool: tool.into(),
                arguments,
                success,
                summary: summary.into(),
            }),
            simple: None,
            dedup_key: None,
        }
    }

    pub fn dataframe(result: &SqlResult) -> Self {
        Self {
            conversation_id: None,
            rich: Some(RichPayload::Dataframe {
                file_hash: result.file_hash.clone(),
                row_count: result.row_count,
                columns: result.columns.clone(),
                preview: result.preview.clone(),
            }),
            simple: None,
            dedup_key: None,
        }
    }

    pub fn chart(chart: ChartDescriptor) -> Self {
        Self {
            conversation_id: None,
            rich: Some(RichPayload::Chart { chart }),
            simple: None,
            dedup_key: None,
        }
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            conversation_id: None,
            rich: Some(RichPayload::Error {
                kind: kind.into(),
                message: message.into(),
            }),
            simple: None,
            dedup_key: None,
        }
    }

    pub fn kind(&self) -> EventKind {
        if self.conversation_id.is_some() {
            return EventKind::ConversationId;
        }
        match &self.rich {
            Some(RichPayload::ReasoningStep { .. }) => EventKind::ReasoningStep,
            Some(RichPayload::ToolCall { .. }) => EventKind::ToolCall,
            Some(RichPayload::Dataframe { .. }) => EventKind::Dataframe,
            Some(RichPayload::Chart { .. }) => EventKind::Chart,
            Some(RichPayload::Error { .. }) => EventKind::Error,
            Some(RichPayload::StatusCard { .. }) => EventKind::ReasoningStep,
            None => EventKind::TextDelta,
        }
    }
}

/// The `done` sentinel is represented out-of-band (spec §6: `data:
/// [DONE]\n\n`), not as a `StreamEvent` variant, since it carries no JSON
/// payload.
pub const DONE_SENTINEL: &str = "[DONE]";

/// First 50 chars of the delta's trimmed content (spec §4.5 dedup key).
pub fn dedup_key_for(text: &str) -> String {
    let trimmed = text.trim();
    trimmed.chars().take(50).collect()
}

/// Attached to an assistant message's debug block when the Few-Shot
/// Selector's `returnDebug` flag is set (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FewShotDebug {
    pub rag_used: bool,
    pub rag_count: usize,
    pub memory_used: bool,
    pub memory_count: usize,
}

impl From<FewShotDebug> for MessageDebugInfo {
    fn from(d: FewShotDebug) -> Self {
        MessageDebugInfo {
            rag_used: d.rag_used,
            rag_count: d.rag_count,
            memory_used: d.memory_used,
            memory_count: d.memory_count,
            exemplar_previews: Vec::new(),
            sql_rejected: false,
            aborted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_trims_and_caps_at_50_chars() {
        let text = format!("  {}  ", "a".repeat(80));
        let key = dedup_key_for(&text);
        assert_eq!(key.len(), 50);
        assert!(!key.starts_with(' '));
    }

    #[test]
    fn dedup_key_short_text_unchanged_modulo_trim() {
        assert_eq!(dedup_key_for("  hello world  "), "hello world");
    }

    #[test]
    fn conversation_id_event_has_no_dedup_key() {
        let id = Uuid::new_v4();
        let event = StreamEvent::conversation_id(id);
        assert_eq!(event.conversation_id, Some(id));
        assert!(event.dedup_key.is_none());
        assert_eq!(event.kind(), EventKind::ConversationId);
    }

    #[test]
    fn serializes_to_spec_shape() {
        let event = StreamEvent::text_delta("hi there");
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("conversationId").is_none());
        assert_eq!(json["simple"]["text"], "hi there");
        assert_eq!(json["dedupKey"], "hi there");
    }
}
