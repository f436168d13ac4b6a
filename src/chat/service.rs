//! Chat service: one user message in, one assistant reply out.
//!
//! A turn loads the recent history of the conversation, lets the model call
//! task tools for a bounded number of rounds, and persists both sides of the
//! exchange. Provider failures become a `success: false` reply instead of an
//! HTTP error so the chat UI can show them inline.

use std::sync::Arc;
use std::time::Instant;

use serde_json::json;

use crate::chat::model::{
    ChatMetadata, ChatRequest, ChatResponse, Conversation, ExecutedToolCall, MessageRole,
    NewMessage, ReplyMessage, StoredMessage, title_preview,
};
use crate::config::ChatConfig;
use crate::error::{DatabaseError, LlmError};
use crate::llm::{ChatMessage, LlmProvider, ToolCompletionRequest};
use crate::store::Database;
use crate::tools::{ToolContext, ToolRegistry};

const QUOTA_REPLY: &str = "We've reached the API quota limit. Please check your API key and \
billing settings, or contact the administrator to update the API key.";
const QUOTA_ERROR: &str = "Quota exceeded - please update your API key or check billing";

/// Result of a successful model turn.
struct TurnOutcome {
    reply: String,
    executed: Vec<ExecutedToolCall>,
}

pub struct ChatService {
    db: Arc<dyn Database>,
    llm: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    config: ChatConfig,
}

impl ChatService {
    pub fn new(
        db: Arc<dyn Database>,
        llm: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        config: ChatConfig,
    ) -> Self {
        Self {
            db,
            llm,
            tools,
            config,
        }
    }

    /// Handle one chat message for `request.user_id`.
    ///
    /// Only storage failures are returned as errors; model failures are
    /// reported in the response body.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, DatabaseError> {
        let conversation = self.resolve_conversation(request).await?;
        let history = self
            .db
            .recent_messages(conversation.id, self.config.history_window)
            .await?;

        let mut attempt = 1;
        let outcome = loop {
            match self.run_turn(request, &history).await {
                Ok(outcome) => break Ok(outcome),
                Err(LlmError::RateLimited { retry_after, .. })
                    if attempt < self.config.max_attempts =>
                {
                    let wait = retry_after.unwrap_or(self.config.retry_backoff * attempt);
                    tracing::warn!(
                        conversation_id = conversation.id,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "Model rate limited, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(outcome) => self.persist(&conversation, request, outcome).await,
            Err(e) => {
                tracing::error!(conversation_id = conversation.id, error = %e, "Chat turn failed");
                Ok(failure_response(conversation.id, &e))
            }
        }
    }

    /// Use the requested conversation when it belongs to the user, otherwise
    /// start a new one titled after the message.
    async fn resolve_conversation(
        &self,
        request: &ChatRequest,
    ) -> Result<Conversation, DatabaseError> {
        if let Some(id) = request.conversation_id {
            if let Some(conversation) = self.db.get_conversation(request.user_id, id).await? {
                return Ok(conversation);
            }
            tracing::debug!(
                conversation_id = id,
                user_id = request.user_id,
                "Conversation not found, starting a new one"
            );
        }
        let title = title_preview(&request.message);
        let conversation = self
            .db
            .create_conversation(request.user_id, Some(&title))
            .await?;
        tracing::info!(
            conversation_id = conversation.id,
            user_id = request.user_id,
            "Created conversation"
        );
        Ok(conversation)
    }

    fn build_messages(&self, history: &[StoredMessage], message: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(&self.config.system_prompt));
        for stored in history {
            match stored.role {
                MessageRole::User => messages.push(ChatMessage::user(&stored.content)),
                MessageRole::Assistant => messages.push(ChatMessage::assistant(&stored.content)),
                MessageRole::System => {}
            }
        }
        messages.push(ChatMessage::user(message));
        messages
    }

    /// LLM -> tools -> LLM, until the model answers without tool calls or
    /// the round limit is hit.
    async fn run_turn(
        &self,
        request: &ChatRequest,
        history: &[StoredMessage],
    ) -> Result<TurnOutcome, LlmError> {
        let ctx = ToolContext {
            user_id: request.user_id,
        };
        let tools = self.tools.tool_definitions().await;
        let mut messages = self.build_messages(history, &request.message);
        let mut executed = Vec::new();

        for round in 1..=self.config.max_tool_rounds {
            let response = self
                .llm
                .complete_with_tools(ToolCompletionRequest::new(messages.clone(), tools.clone()))
                .await?;
            tracing::debug!(
                round,
                model = self.llm.model_name(),
                input_tokens = response.input_tokens,
                output_tokens = response.output_tokens,
                tool_calls = response.tool_calls.len(),
                "Model responded"
            );

            if response.tool_calls.is_empty() {
                return Ok(TurnOutcome {
                    reply: response.content.unwrap_or_default(),
                    executed,
                });
            }

            messages.push(ChatMessage::assistant_with_tool_calls(
                response.content,
                response.tool_calls.clone(),
            ));
            for call in response.tool_calls {
                let result = self.execute_tool(&call.name, call.arguments.clone(), &ctx).await;
                messages.push(ChatMessage::tool_result(&call.id, result.to_string()));
                executed.push(ExecutedToolCall {
                    name: call.name,
                    arguments: call.arguments,
                    result,
                });
            }
        }

        tracing::warn!(
            rounds = self.config.max_tool_rounds,
            "Tool round limit reached without a final answer"
        );
        Ok(TurnOutcome {
            reply: summarize_tool_results(&executed),
            executed,
        })
    }

    /// Run a tool and always produce a JSON result for the model.
    async fn execute_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> serde_json::Value {
        let Some(tool) = self.tools.get(name).await else {
            tracing::warn!(tool = %name, "Model requested unknown tool");
            return json!({
                "success": false,
                "error": "Unknown tool",
                "message": format!("There is no tool named '{name}'."),
            });
        };

        let start = Instant::now();
        match tool.execute(arguments, ctx).await {
            Ok(output) => {
                tracing::info!(
                    tool = %name,
                    user_id = ctx.user_id,
                    duration_ms = output.duration.as_millis() as u64,
                    "Tool executed"
                );
                output.result
            }
            Err(e) => {
                tracing::warn!(
                    tool = %name,
                    user_id = ctx.user_id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    error = %e,
                    "Tool failed"
                );
                json!({
                    "success": false,
                    "error": e.to_string(),
                    "message": format!("The {name} tool failed: {e}"),
                })
            }
        }
    }

    async fn persist(
        &self,
        conversation: &Conversation,
        request: &ChatRequest,
        outcome: TurnOutcome,
    ) -> Result<ChatResponse, DatabaseError> {
        let tool_calls = if outcome.executed.is_empty() {
            None
        } else {
            Some(
                serde_json::to_value(&outcome.executed)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
            )
        };

        self.db
            .add_message(&NewMessage {
                conversation_id: conversation.id,
                user_id: request.user_id,
                role: MessageRole::User,
                content: request.message.clone(),
                tool_calls,
            })
            .await?;
        self.db
            .add_message(&NewMessage {
                conversation_id: conversation.id,
                user_id: request.user_id,
                role: MessageRole::Assistant,
                content: outcome.reply.clone(),
                tool_calls: None,
            })
            .await?;
        self.db.touch_conversation(conversation.id).await?;

        let has_tool_calls = !outcome.executed.is_empty();
        Ok(ChatResponse {
            conversation_id: conversation.id,
            message: ReplyMessage {
                role: MessageRole::Assistant,
                content: outcome.reply,
            },
            tool_calls_executed: outcome.executed,
            success: true,
            error_message: None,
            metadata: ChatMetadata { has_tool_calls },
        })
    }
}

/// Fallback reply built from the tools' own messages.
fn summarize_tool_results(executed: &[ExecutedToolCall]) -> String {
    let lines: Vec<&str> = executed
        .iter()
        .filter_map(|call| call.result.get("message").and_then(|m| m.as_str()))
        .collect();
    if lines.is_empty() {
        "I wasn't able to finish that request. Please try rephrasing it.".to_string()
    } else {
        lines.join("\n")
    }
}

fn failure_response(conversation_id: i64, error: &LlmError) -> ChatResponse {
    let (content, error_message) = match error {
        LlmError::QuotaExceeded { .. } => (QUOTA_REPLY.to_string(), QUOTA_ERROR.to_string()),
        other => (
            format!("I'm a bit overwhelmed right now. Please try again in 30 seconds. (Error: {other})"),
            other.to_string(),
        ),
    };
    ChatResponse {
        conversation_id,
        message: ReplyMessage {
            role: MessageRole::Assistant,
            content,
        },
        tool_calls_executed: Vec::new(),
        success: false,
        error_message: Some(error_message),
        metadata: ChatMetadata::default(),
    }
}
