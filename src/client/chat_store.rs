//! Client chat state: a reducer over [`ChatAction`]s, observed through a
//! watch channel.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::chat::model::{Conversation, ExecutedToolCall, MessageRole, StoredMessage};

/// Title given to conversations created locally.
pub const NEW_CONVERSATION_TITLE: &str = "New Conversation";

const TEMPORARY_PREFIX: &str = "conv-";

/// Last millisecond value handed out as a temporary id.
static LAST_TEMPORARY: AtomicI64 = AtomicI64::new(0);

/// A conversation id: either a client-only placeholder or the server's id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationId {
    Temporary(String),
    Server(i64),
}

impl ConversationId {
    /// Fresh placeholder id, `conv-<millis>`. Ids are strictly increasing
    /// within the process, so two calls in the same millisecond still differ.
    pub fn temporary() -> Self {
        let now = Utc::now().timestamp_millis();
        let previous = LAST_TEMPORARY
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        let stamp = now.max(previous + 1);
        Self::Temporary(format!("{TEMPORARY_PREFIX}{stamp}"))
    }

    /// Numeric ids are server ids; anything else is temporary.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<i64>() {
            Ok(id) => Self::Server(id),
            Err(_) => Self::Temporary(raw.to_string()),
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    pub fn server_id(&self) -> Option<i64> {
        match self {
            Self::Server(id) => Some(*id),
            Self::Temporary(_) => None,
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temporary(token) => f.write_str(token),
            Self::Server(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Call,
    Success,
    Error,
}

/// A tool call as shown under an assistant message. Calls reported by the
/// server have already run, so they are always `Success`; whether the tool
/// itself succeeded is in `result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallView {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
    pub status: ToolCallStatus,
    pub result: Option<serde_json::Value>,
}

impl ToolCallView {
    pub fn from_executed(id: String, call: &ExecutedToolCall) -> Self {
        Self {
            id,
            name: call.name.clone(),
            args: call.arguments.clone(),
            status: ToolCallStatus::Success,
            result: Some(call.result.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageView {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
    pub tool_calls: Vec<ToolCallView>,
}

impl ChatMessageView {
    pub fn from_stored(message: &StoredMessage) -> Self {
        let tool_calls = message
            .tool_calls
            .as_ref()
            .and_then(|v| serde_json::from_value::<Vec<ExecutedToolCall>>(v.clone()).ok())
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(i, call)| ToolCallView::from_executed(format!("tc-{}-{i}", message.id), call))
            .collect();
        Self {
            id: message.id.to_string(),
            role: message.role,
            content: message.content.clone(),
            created_at: message.created_at,
            status: MessageStatus::Sent,
            tool_calls,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: ConversationId,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<ChatMessageView>,
}

impl ConversationEntry {
    /// Local placeholder conversation.
    pub fn new_temporary() -> Self {
        Self {
            id: ConversationId::temporary(),
            title: NEW_CONVERSATION_TITLE.to_string(),
            updated_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    /// List entry for a server conversation. Messages are loaded separately.
    pub fn from_server(conversation: &Conversation) -> Self {
        Self {
            id: ConversationId::Server(conversation.id),
            title: conversation.display_title(),
            updated_at: conversation.updated_at,
            messages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    pub conversations: Vec<ConversationEntry>,
    pub active: Option<ConversationId>,
    /// Messages of the active conversation.
    pub messages: Vec<ChatMessageView>,
    pub is_loading: bool,
    pub is_typing: bool,
    pub error: Option<String>,
}

impl ChatState {
    pub fn conversation(&self, id: &ConversationId) -> Option<&ConversationEntry> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    pub fn active_conversation(&self) -> Option<&ConversationEntry> {
        self.active.as_ref().and_then(|id| self.conversation(id))
    }

    fn mirror_messages(&mut self) {
        let Some(active) = self.active.clone() else {
            return;
        };
        let messages = self.messages.clone();
        if let Some(entry) = self.conversations.iter_mut().find(|c| c.id == active) {
            entry.messages = messages;
            entry.updated_at = Utc::now();
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatAction {
    SetLoading(bool),
    SetTyping(bool),
    SetError(String),
    ClearError,
    SetConversations(Vec<ConversationEntry>),
    SetActiveConversation(Option<ConversationId>),
    AddMessage(ChatMessageView),
    UpdateMessage { id: String, status: MessageStatus },
    /// Replace a temporary id with the id the server assigned.
    ReconcileConversation {
        temporary: ConversationId,
        server_id: i64,
        title: Option<String>,
    },
}

pub fn reduce(state: &mut ChatState, action: ChatAction) {
    match action {
        ChatAction::SetLoading(loading) => state.is_loading = loading,
        ChatAction::SetTyping(typing) => state.is_typing = typing,
        ChatAction::SetError(message) => state.error = Some(message),
        ChatAction::ClearError => state.error = None,
        ChatAction::SetConversations(conversations) => state.conversations = conversations,
        ChatAction::SetActiveConversation(id) => {
            let messages = id
                .as_ref()
                .and_then(|id| state.conversation(id))
                .map(|c| c.messages.clone())
                .unwrap_or_default();
            state.messages = messages;
            state.active = id;
        }
        ChatAction::AddMessage(message) => {
            state.messages.push(message);
            state.mirror_messages();
        }
        ChatAction::UpdateMessage { id, status } => {
            if let Some(message) = state.messages.iter_mut().find(|m| m.id == id) {
                message.status = status;
            }
            state.mirror_messages();
        }
        ChatAction::ReconcileConversation {
            temporary,
            server_id,
            title,
        } => reconcile(state, temporary, server_id, title),
    }
}

fn reconcile(state: &mut ChatState, temporary: ConversationId, server_id: i64, title: Option<String>) {
    if !temporary.is_temporary() {
        return;
    }
    let server = ConversationId::Server(server_id);
    let Some(pos) = state.conversations.iter().position(|c| c.id == temporary) else {
        return;
    };
    let mut entry = state.conversations.remove(pos);

    // A fetch may already have brought in the server entry; merge into it.
    match state.conversations.iter_mut().find(|c| c.id == server) {
        Some(existing) => {
            existing.messages = entry.messages;
            existing.updated_at = entry.updated_at;
        }
        None => {
            entry.id = server.clone();
            if let Some(title) = title.filter(|_| entry.title == NEW_CONVERSATION_TITLE) {
                entry.title = title;
            }
            state.conversations.insert(pos, entry);
        }
    }

    if state.active.as_ref() == Some(&temporary) {
        state.active = Some(server);
    }
}

/// Shared chat state container.
pub struct ChatStore {
    tx: watch::Sender<ChatState>,
}

impl ChatStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ChatState::default());
        Self { tx }
    }

    pub fn dispatch(&self, action: ChatAction) {
        self.tx.send_modify(|state| reduce(state, action));
    }

    /// Current state, cloned.
    pub fn state(&self) -> ChatState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.tx.subscribe()
    }
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}
