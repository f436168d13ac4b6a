//! Anthropic Messages API adapter.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    ChatMessage, FinishReason, LlmConfig, LlmProvider, Role, ToolCall, ToolCompletionRequest,
    ToolCompletionResponse,
};
use crate::error::LlmError;

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

/// `LlmProvider` backed by `POST {base_url}/v1/messages`.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
        })
    }

    fn build_body(&self, request: &ToolCompletionRequest) -> Value {
        let (system, messages) = convert_messages(&request.messages);
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "messages": messages,
        });
        if let Some(system) = system {
            body["system"] = Value::String(system);
        }
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
        }
        body
    }
}

/// Split out system prompts and map the rest to Anthropic message objects.
///
/// Tool results become `tool_result` blocks in a user turn; consecutive results
/// share one turn so they directly follow the assistant's `tool_use` blocks.
fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system_parts = Vec::new();
    let mut out: Vec<Value> = Vec::new();
    let mut pending_results: Vec<Value> = Vec::new();

    let flush = |out: &mut Vec<Value>, pending: &mut Vec<Value>| {
        if !pending.is_empty() {
            out.push(json!({"role": "user", "content": std::mem::take(pending)}));
        }
    };

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(msg.content.clone()),
            Role::Tool => pending_results.push(json!({
                "type": "tool_result",
                "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                "content": msg.content,
            })),
            Role::User => {
                flush(&mut out, &mut pending_results);
                out.push(json!({"role": "user", "content": msg.content}));
            }
            Role::Assistant => {
                flush(&mut out, &mut pending_results);
                if msg.tool_calls.is_empty() {
                    out.push(json!({"role": "assistant", "content": msg.content}));
                } else {
                    let mut blocks = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": msg.content}));
                    }
                    for call in &msg.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    out.push(json!({"role": "assistant", "content": blocks}));
                }
            }
        }
    }
    flush(&mut out, &mut pending_results);

    let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
    (system, out)
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

fn parse_response(resp: MessagesResponse) -> ToolCompletionResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in resp.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(&t),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
            ContentBlock::Other => {}
        }
    }
    let finish_reason = match resp.stop_reason.as_deref() {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolUse,
        _ => FinishReason::Unknown,
    };
    ToolCompletionResponse {
        content: (!text.is_empty()).then_some(text),
        tool_calls,
        input_tokens: resp.usage.input_tokens,
        output_tokens: resp.usage.output_tokens,
        finish_reason,
    }
}

/// Map non-success responses to typed errors.
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    // 529 is Anthropic's "overloaded"; retry it like a rate limit.
    if status.as_u16() == 429 || status.as_u16() == 529 {
        return Err(LlmError::RateLimited {
            provider: PROVIDER.to_string(),
            retry_after: parse_retry_after(&resp),
        });
    }
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(LlmError::AuthFailed {
            provider: PROVIDER.to_string(),
        });
    }
    let body = resp.text().await.unwrap_or_default();
    if body.contains("credit balance") || body.contains("quota") {
        return Err(LlmError::QuotaExceeded {
            provider: PROVIDER.to_string(),
        });
    }
    Err(LlmError::RequestFailed {
        provider: PROVIDER.to_string(),
        reason: format!("HTTP {status}: {body}"),
    })
}

fn parse_retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let body = self.build_body(&request);
        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let resp = check_response(resp).await?;
        let parsed: MessagesResponse =
            resp.json().await.map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let out = parse_response(parsed);
        tracing::debug!(
            input_tokens = out.input_tokens,
            output_tokens = out.output_tokens,
            tool_calls = out.tool_calls.len(),
            "Completion received"
        );
        Ok(out)
    }
}
