//! Agent Loop (C6).
//!
//! Drives the tool-calling conversation with the LLM: dispatches `run_sql`
//! and `visualize_data` calls behind the Tool Permission Manager, enforces
//! the SQL safeguard, and bounds the interaction by both an iteration count
//! and a wall-clock deadline. Grounded on the teacher's agent turn loop in
//! `brain-cognitive::agents::traits::BrainAgent::execute` (iterate, dispatch,
//! append results, check a budget) generalized from the teacher's
//! single-capability agents to a tool-calling loop against one LLM.

pub mod permissions;
pub mod tools;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chatsql_core::{ArtifactStore, LLMProvider, LlmMessage, LlmRequest, LlmTurn, QueryExecutor};
use chatsql_types::event::StreamEvent;
use chatsql_types::model::{
    ChartDescriptor, ReasoningStep, ReasoningStepStatus, SqlResult, ToolCallRecord, UserGroup,
};
use chatsql_types::Result;
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use permissions::{ToolPermissionManager, RUN_SQL, VISUALIZE_DATA};

/// Outcome of one full agent run: enough to both stream to the client and
/// persist as the assistant message's `extra` payload.
#[derive(Debug, Clone, Default)]
pub struct AgentRunResult {
    pub final_text: String,
    pub sql: Option<String>,
    pub result_file_hash: Option<String>,
    pub chart: Option<ChartDescriptor>,
    pub reasoning_steps: Vec<ReasoningStep>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub deadline_exceeded: bool,
    /// Set when the loop stopped because the event receiver (client
    /// connection) was already gone, rather than finishing normally.
    pub aborted: bool,
}

pub struct AgentLoop {
    llm: Arc<dyn LLMProvider>,
    executor: Arc<dyn QueryExecutor>,
    artifacts: Arc<dyn ArtifactStore>,
    max_iterations: u32,
    deadline: Duration,
}

impl AgentLoop {
    pub fn new(
        llm: Arc<dyn LLMProvider>,
        executor: Arc<dyn QueryExecutor>,
        artifacts: Arc<dyn ArtifactStore>,
        max_iterations: u32,
        deadline: Duration,
    ) -> Self {
        Self {
            llm,
            executor,
            artifacts,
            max_iterations,
            deadline,
        }
    }

    /// Runs the tool-calling loop for one user message, streaming progress
    /// on `events` as it goes. `history` is the prior transcript (already
    /// trimmed by the caller); `system_prompt` is the composed prompt for
    /// this turn.
    pub async fn run(
        &self,
        message_id: Uuid,
        system_prompt: String,
        user_message: &str,
        mut history: Vec<LlmMessage>,
        group: UserGroup,
        events: &Sender<StreamEvent>,
    ) -> Result<AgentRunResult> {
        history.push(LlmMessage {
            role: "user".to_string(),
            content: user_message.to_string(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        });

        let mut result = AgentRunResult::default();
        let mut last_sql_result: Option<SqlResult> = None;
        let started_at = Instant::now();
        let mut step = 0u32;

        for iteration in 0..self.max_iterations {
            if events.is_closed() {
                result.aborted = true;
                break;
            }
            if started_at.elapsed() > self.deadline {
                result.deadline_exceeded = true;
                let _ = events.send(StreamEvent::error("deadline_exceeded", "the agent ran out of time")).await;
                break;
            }

            step += 1;
            let _ = events
                .send(StreamEvent::reasoning_step(
                    step,
                    ReasoningStepStatus::Running,
                    format!("iteration {}/{}", iteration + 1, self.max_iterations),
                ))
                .await;

            let request = LlmRequest {
                system_prompt: system_prompt.clone(),
                messages: history.clone(),
                tools: tools::catalogue(),
            };

            let response = match self.llm.complete(request).await {
                Ok(r) => r,
                Err(e) => {
                    let _ = events.send(StreamEvent::error("upstream", e.to_string())).await;
                    result.reasoning_steps.push(ReasoningStep {
                        step,
                        status: ReasoningStepStatus::Error,
                        message: format!("language model call failed: {e}"),
                    });
                    return Ok(result);
                }
            };

            match response.turn {
                LlmTurn::Text(text) => {
                    result.final_text = text.clone();
                    result.reasoning_steps.push(ReasoningStep {
                        step,
                        status: ReasoningStepStatus::Done,
                        message: "produced a final answer".to_string(),
                    });
                    let _ = events.send(StreamEvent::text_delta(text)).await;
                    break;
                }
                LlmTurn::ToolCalls(calls) => {
                    history.push(LlmMessage {
                        role: "assistant".to_string(),
                        content: String::new(),
                        tool_calls: calls.clone(),
                        tool_call_id: None,
                    });

                    for call in calls {
                        let (summary, success, tool_message) = self
                            .dispatch(
                                message_id,
                                group,
                                &call.name,
                                &call.arguments,
                                &mut last_sql_result,
                                &mut result,
                                events,
                            )
                            .await;

                        let _ = events.send(StreamEvent::tool_call(call.name.clone(), call.arguments.clone(), success, summary)).await;

                        history.push(LlmMessage {
                            role: "tool".to_string(),
                            content: tool_message,
                            tool_calls: Vec::new(),
                            tool_call_id: Some(call.id),
                        });
                    }

                    result.reasoning_steps.push(ReasoningStep {
                        step,
                        status: ReasoningStepStatus::Done,
                        message: "dispatched tool calls".to_string(),
                    });
                }
            }
        }

        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        message_id: Uuid,
        group: UserGroup,
        tool_name: &str,
        arguments: &serde_json::Value,
        last_sql_result: &mut Option<SqlResult>,
        result: &mut AgentRunResult,
        events: &Sender<StreamEvent>,
    ) -> (String, bool, String) {
        if !ToolPermissionManager::is_allowed(group, tool_name) {
            let message = format!("tool '{tool_name}' is not permitted for this user's group");
            result.tool_calls.push(ToolCallRecord {
                id: Uuid::new_v4(),
                message_id,
                tool_name: tool_name.to_string(),
                arguments: arguments.clone(),
                result_summary: message.clone(),
                success: false,
                timestamp: chrono::Utc::now(),
            });
            return (message.clone(), false, message);
        }

        match tool_name {
            RUN_SQL => self.dispatch_run_sql(message_id, arguments, last_sql_result, result, events).await,
            VISUALIZE_DATA => self.dispatch_visualize(message_id, arguments, last_sql_result, result, events).await,
            other => {
                let message = format!("unknown tool '{other}'");
                result.tool_calls.push(ToolCallRecord {
                    id: Uuid::new_v4(),
                    message_id,
                    tool_name: other.to_string(),
                    arguments: arguments.clone(),
                    result_summary: message.clone(),
                    success: false,
                    timestamp: chrono::Utc::now(),
                });
                (message.clone(), false, message)
            }
        }
    }

    async fn dispatch_run_sql(
        &self,
        message_id: Uuid,
        arguments: &serde_json::Value,
        last_sql_result: &mut Option<SqlResult>,
        result: &mut AgentRunResult,
        events: &Sender<StreamEvent>,
    ) -> (String, bool, String) {
        let sql = arguments.get("sql").and_then(|v| v.as_str()).unwrap_or_default();

        if let Err(violation) = tools::safeguard_sql(sql) {
            let message = format!("rejected: {violation}");
            result.tool_calls.push(ToolCallRecord {
                id: Uuid::new_v4(),
                message_id,
                tool_name: RUN_SQL.to_string(),
                arguments: arguments.clone(),
                result_summary: message.clone(),
                success: false,
                timestamp: chrono::Utc::now(),
            });
            return (message.clone(), false, message);
        }

        match tools::run_sql(&self.executor, &self.artifacts, sql).await {
            Ok(sql_result) => {
                let summary = format!("{} row(s), {} column(s)", sql_result.row_count, sql_result.columns.len());
                result.sql = Some(sql.to_string());
                result.result_file_hash = Some(sql_result.file_hash.clone());
                *last_sql_result = Some(sql_result);
                result.tool_calls.push(ToolCallRecord {
                    id: Uuid::new_v4(),
                    message_id,
                    tool_name: RUN_SQL.to_string(),
                    arguments: arguments.clone(),
                    result_summary: summary.clone(),
                    success: true,
                    timestamp: chrono::Utc::now(),
                });
                let _ = events.send(StreamEvent::dataframe(last_sql_result.as_ref().unwrap())).await;
                let payload = serde_json::to_string(last_sql_result.as_ref().unwrap()).unwrap_or_default();
                (summary, true, payload)
            }
            Err(e) => {
                let message = format!("execution failed: {e}");
                result.tool_calls.push(ToolCallRecord {
                    id: Uuid::new_v4(),
                    message_id,
                    tool_name: RUN_SQL.to_string(),
                    arguments: arguments.clone(),
                    result_summary: message.clone(),
                    success: false,
                    timestamp: chrono::Utc::now(),
                });
                (message.clone(), false, message)
            }
        }
    }

    async fn dispatch_visualize(
        &self,
        message_id: Uuid,
        arguments: &serde_json::Value,
        last_sql_result: &mut Option<SqlResult>,
        result: &mut AgentRunResult,
        events: &Sender<StreamEvent>,
    ) -> (String, bool, String) {
        let file_hash = arguments.get("fileHash").and_then(|v| v.as_str()).unwrap_or_default();
        let hint = arguments.get("chartTypeHint").and_then(|v| v.as_str());

        let columns = match last_sql_result {
            Some(sql_result) if sql_result.file_hash == file_hash => sql_result.columns.clone(),
            _ => {
                let message = format!("no query result on file hash '{file_hash}' in this turn");
                result.tool_calls.push(ToolCallRecord {
                    id: Uuid::new_v4(),
                    message_id,
                    tool_name: VISUALIZE_DATA.to_string(),
                    arguments: arguments.clone(),
                    result_summary: message.clone(),
                    success: false,
                    timestamp: chrono::Utc::now(),
                });
                return (message.clone(), false, message);
            }
        };

        match tools::visualize_data(file_hash, &columns, hint) {
            Ok(chart) => {
                let summary = format!("{:?} chart: {}", chart.chart_type, chart.title);
                result.chart = Some(chart.clone());
                result.tool_calls.push(ToolCallRecord {
                    id: Uuid::new_v4(),
                    message_id,
                    tool_name: VISUALIZE_DATA.to_string(),
                    arguments: arguments.clone(),
                    result_summary: summary.clone(),
                    success: true,
                    timestamp: chrono::Utc::now(),
                });
                let _ = events.send(StreamEvent::chart(chart.clone())).await;
                let payload = serde_json::to_string(&chart).unwrap_or_default();
                (summary, true, payload)
            }
            Err(e) => {
                let message = format!("chart descriptor failed: {e}");
                result.tool_calls.push(ToolCallRecord {
                    id: Uuid::new_v4(),
                    message_id,
                    tool_name: VISUALIZE_DATA.to_string(),
                    arguments: arguments.clone(),
                    result_summary: message.clone(),
                    success: false,
                    timestamp: chrono::Utc::now(),
                });
                (message.clone(), false, message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsql_core::testing::{FakeLlmProvider, FakeQueryExecutor};
    use chatsql_core::LlmToolCall;
    use std::sync::Mutex;

    struct RecordingArtifactStore {
        written: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl ArtifactStore for RecordingArtifactStore {
        async fn write_csv(&self, file_hash: &str, _columns: &[String], _rows: &[Vec<serde_json::Value>]) -> Result<()> {
            self.written.lock().unwrap().push(file_hash.to_string());
            Ok(())
        }
        async fn exists(&self, file_hash: &str) -> Result<bool> {
            Ok(self.written.lock().unwrap().iter().any(|h| h == file_hash))
        }
    }

    fn channel() -> (Sender<StreamEvent>, tokio::sync::mpsc::Receiver<StreamEvent>) {
        tokio::sync::mpsc::channel(64)
    }

    #[tokio::test]
    async fn final_text_turn_ends_the_loop_immediately() {
        let llm = Arc::new(FakeLlmProvider::new(vec![LlmTurn::Text("the answer is 42".to_string())]));
        let executor = Arc::new(FakeQueryExecutor::empty());
        let artifacts = Arc::new(RecordingArtifactStore { written: Mutex::new(Vec::new()) });
        let agent = AgentLoop::new(llm, executor, artifacts, 8, Duration::from_secs(60));
        let (tx, _rx) = channel();

        let result = agent
            .run(Uuid::new_v4(), "system".to_string(), "how many orders?", Vec::new(), UserGroup::User, &tx)
            .await
            .unwrap();

        assert_eq!(result.final_text, "the answer is 42");
        assert!(!result.deadline_exceeded);
    }

    #[tokio::test]
    async fn tool_outside_the_callers_allowed_set_is_denied_and_loop_continues() {
        let llm = Arc::new(FakeLlmProvider::new(vec![
            LlmTurn::ToolCalls(vec![LlmToolCall {
                id: "call_1".to_string(),
                name: "export_all_data".to_string(),
                arguments: serde_json::json!({}),
            }]),
            LlmTurn::Text("done".to_string()),
        ]));
        let executor = Arc::new(FakeQueryExecutor::empty());
        let artifacts = Arc::new(RecordingArtifactStore { written: Mutex::new(Vec::new()) });
        let agent = AgentLoop::new(llm, executor, artifacts, 8, Duration::from_secs(60));
        let (tx, _rx) = channel();

        let result = agent
            .run(Uuid::new_v4(), "system".to_string(), "export everything", Vec::new(), UserGroup::Guest, &tx)
            .await
            .unwrap();

        assert_eq!(result.final_text, "done");
        assert_eq!(result.tool_calls.len(), 1);
        assert!(!result.tool_calls[0].success);
        assert!(result.tool_calls[0].result_summary.contains("not permitted"));
    }

    #[tokio::test]
    async fn run_sql_succeeds_for_a_guest_user_since_its_in_the_default_set() {
        let llm = Arc::new(FakeLlmProvider::new(vec![
            LlmTurn::ToolCalls(vec![LlmToolCall {
                id: "call_1".to_string(),
                name: "run_sql".to_string(),
                arguments: serde_json::json!({ "sql": "SELECT 1 FROM orders" }),
            }]),
            LlmTurn::Text("done".to_string()),
        ]));
        let executor = Arc::new(FakeQueryExecutor {
            rows: vec![vec![serde_json::json!(1)]],
            columns: vec!["n".to_string()],
        });
        let artifacts = Arc::new(RecordingArtifactStore { written: Mutex::new(Vec::new()) });
        let agent = AgentLoop::new(llm, executor, artifacts, 8, Duration::from_secs(60));
        let (tx, _rx) = channel();

        let result = agent
            .run(Uuid::new_v4(), "system".to_string(), "show me orders", Vec::new(), UserGroup::Guest, &tx)
            .await
            .unwrap();

        assert_eq!(result.final_text, "done");
        assert_eq!(result.tool_calls.len(), 1);
        assert!(result.tool_calls[0].success);
    }

    #[tokio::test]
    async fn successful_run_sql_emits_a_dataframe_event_carrying_the_result_file_hash() {
        let llm = Arc::new(FakeLlmProvider::new(vec![
            LlmTurn::ToolCalls(vec![LlmToolCall {
                id: "call_1".to_string(),
                name: "run_sql".to_string(),
                arguments: serde_json::json!({ "sql": "SELECT 1 FROM orders" }),
            }]),
            LlmTurn::Text("done".to_string()),
        ]));
        let executor = Arc::new(FakeQueryExecutor {
            rows: vec![vec![serde_json::json!(1)]],
            columns: vec!["n".to_string()],
        });
        let artifacts = Arc::new(RecordingArtifactStore { written: Mutex::new(Vec::new()) });
        let agent = AgentLoop::new(llm, executor, artifacts, 8, Duration::from_secs(60));
        let (tx, mut rx) = channel();

        let result = agent
            .run(Uuid::new_v4(), "system".to_string(), "show me orders", Vec::new(), UserGroup::Guest, &tx)
            .await
            .unwrap();
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        let dataframe = events.iter().find_map(|e| match &e.rich {
            Some(chatsql_types::event::RichPayload::Dataframe { file_hash, .. }) => Some(file_hash.clone()),
            _ => None,
        });
        assert_eq!(dataframe, result.result_file_hash);
    }

    #[tokio::test]
    async fn invalid_sql_is_rejected_without_reaching_executor() {
        let llm = Arc::new(FakeLlmProvider::new(vec![
            LlmTurn::ToolCalls(vec![LlmToolCall {
                id: "call_1".to_string(),
                name: "run_sql".to_string(),
                arguments: serde_json::json!({ "sql": "DROP TABLE orders" }),
            }]),
            LlmTurn::Text("recovered".to_string()),
        ]));
        let executor = Arc::new(FakeQueryExecutor::empty());
        let artifacts = Arc::new(RecordingArtifactStore { written: Mutex::new(Vec::new()) });
        let agent = AgentLoop::new(llm, executor, artifacts, 8, Duration::from_secs(60));
        let (tx, _rx) = channel();

        let result = agent
            .run(Uuid::new_v4(), "system".to_string(), "drop the orders table", Vec::new(), UserGroup::Admin, &tx)
            .await
            .unwrap();

        assert_eq!(result.tool_calls.len(), 1);
        assert!(!result.tool_calls[0].success);
        assert!(artifacts.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn executor_failure_is_reported_as_a_tool_error_and_loop_does_not_abort() {
        let llm = Arc::new(FakeLlmProvider::new(vec![
            LlmTurn::ToolCalls(vec![LlmToolCall {
                id: "call_1".to_string(),
                name: "run_sql".to_string(),
                arguments: serde_json::json!({ "sql": "SELECT 1 FROM __FORCE_EXECUTOR_FAILURE__" }),
            }]),
            LlmTurn::Text("sorry, that failed".to_string()),
        ]));
        let executor = Arc::new(FakeQueryExecutor::empty());
        let artifacts = Arc::new(RecordingArtifactStore { written: Mutex::new(Vec::new()) });
        let agent = AgentLoop::new(llm, executor, artifacts, 8, Duration::from_secs(60));
        let (tx, _rx) = channel();

        let result = agent
            .run(Uuid::new_v4(), "system".to_string(), "break it", Vec::new(), UserGroup::Admin, &tx)
            .await
            .unwrap();

        assert_eq!(result.final_text, "sorry, that failed");
        assert!(!result.tool_calls[0].success);
    }
}
