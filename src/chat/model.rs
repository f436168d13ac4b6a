//! Conversation and chat payload types shared by the server and the client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of characters of the first user message used as a conversation title.
pub const TITLE_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// A server-side conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub user_id: i64,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Title to display, falling back to `Conversation <id>`.
    pub fn display_title(&self) -> String {
        match self.title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => format!("Conversation {}", self.id),
        }
    }
}

/// Derive a conversation title from the first user message.
pub fn title_preview(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.chars().count() <= TITLE_PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let mut preview: String = trimmed.chars().take(TITLE_PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub user_id: i64,
    pub role: MessageRole,
    pub content: String,
    /// Tool calls executed while answering this message, as stored JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a chat message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub user_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub tool_calls: Option<serde_json::Value>,
}

/// Conversation with its full message history, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<StoredMessage>,
}

/// Body of `POST /api/{user_id}/chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub user_id: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<i64>,
}

/// A tool call the assistant executed during a chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: serde_json::Value,
}

impl ExecutedToolCall {
    /// Whether the tool result reported success.
    pub fn succeeded(&self) -> bool {
        self.result
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyMessage {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMetadata {
    pub has_tool_calls: bool,
}

/// Response of `POST /api/{user_id}/chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub conversation_id: i64,
    pub message: ReplyMessage,
    #[serde(default)]
    pub tool_calls_executed: Vec<ExecutedToolCall>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: ChatMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&MessageRole::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(MessageRole::parse("user"), Some(MessageRole::User));
        assert_eq!(MessageRole::parse("tool"), None);
    }

    #[test]
    fn display_title_falls_back_to_id() {
        let now = Utc::now();
        let mut conv = Conversation {
            id: 42,
            user_id: 1,
            title: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(conv.display_title(), "Conversation 42");
        conv.title = Some("Groceries".into());
        assert_eq!(conv.display_title(), "Groceries");
    }

    #[test]
    fn title_preview_truncates() {
        assert_eq!(title_preview("  hi  "), "hi");
        let long = "a".repeat(80);
        let preview = title_preview(&long);
        assert_eq!(preview.chars().count(), TITLE_PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn detail_flattens_conversation() {
        let now = Utc::now();
        let detail = ConversationDetail {
            conversation: Conversation {
                id: 3,
                user_id: 1,
                title: Some("t".into()),
                created_at: now,
                updated_at: now,
            },
            messages: vec![],
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["id"], 3);
        assert!(json["messages"].as_array().unwrap().is_empty());
    }

    #[test]
    fn chat_response_defaults() {
        let json = r#"{
            "conversation_id": 5,
            "message": {"role": "assistant", "content": "Done"},
            "success": true
        }"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(resp.tool_calls_executed.is_empty());
        assert!(!resp.metadata.has_tool_calls);
        assert!(resp.error_message.is_none());
    }

    #[test]
    fn executed_tool_call_success_flag() {
        let call = ExecutedToolCall {
            name: "add_task".into(),
            arguments: serde_json::json!({"title": "x"}),
            result: serde_json::json!({"success": true, "message": "ok"}),
        };
        assert!(call.succeeded());
    }
}
