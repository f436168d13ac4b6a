//! Chat controller: conversation list management and message sending on top
//! of [`ChatStore`].

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::api::ChatApi;
use super::chat_store::{
    ChatAction, ChatMessageView, ChatStore, ConversationEntry, ConversationId, MessageStatus,
    ToolCallView,
};
use super::session::{AuthSession, LogoutReason};
use crate::chat::model::{ChatRequest, ChatResponse, MessageRole, title_preview};
use crate::error::ClientError;

/// Error shown when a chat call comes back 401.
pub const SESSION_EXPIRED: &str = "Session expired. Redirecting to login...";

/// Sent when the assistant ran a tool that changed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskRefresh;

pub struct ChatController {
    api: Arc<dyn ChatApi>,
    session: Arc<AuthSession>,
    store: Arc<ChatStore>,
    user_id: i64,
    task_refresh: broadcast::Sender<TaskRefresh>,
}

impl ChatController {
    pub fn new(
        api: Arc<dyn ChatApi>,
        session: Arc<AuthSession>,
        store: Arc<ChatStore>,
        user_id: i64,
    ) -> Self {
        let (task_refresh, _rx) = broadcast::channel(16);
        Self {
            api,
            session,
            store,
            user_id,
            task_refresh,
        }
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    pub fn subscribe_task_refresh(&self) -> broadcast::Receiver<TaskRefresh> {
        self.task_refresh.subscribe()
    }

    /// Record a failure in the store. A 401 also ends the session.
    async fn fail(&self, error: &ClientError) {
        if error.is_unauthorized() {
            self.session.end(LogoutReason::Expired).await;
            self.store.dispatch(ChatAction::SetError(SESSION_EXPIRED.to_string()));
        } else {
            self.store.dispatch(ChatAction::SetError(error.to_string()));
        }
    }

    /// Load the server's conversation list. Local placeholders stay on top.
    pub async fn fetch_conversations(&self) -> Result<(), ClientError> {
        self.store.dispatch(ChatAction::SetLoading(true));
        let result = self.api.list_conversations().await;
        match result {
            Ok(ref conversations) => {
                let mut entries: Vec<ConversationEntry> = self
                    .store
                    .state()
                    .conversations
                    .into_iter()
                    .filter(|c| c.id.is_temporary())
                    .collect();
                entries.extend(conversations.iter().map(ConversationEntry::from_server));
                self.store.dispatch(ChatAction::SetConversations(entries));
            }
            Err(ref e) => self.fail(e).await,
        }
        self.store.dispatch(ChatAction::SetLoading(false));
        result.map(|_| ())
    }

    /// Start a local conversation and make it active.
    pub fn new_conversation(&self) -> ConversationId {
        let entry = ConversationEntry::new_temporary();
        let id = entry.id.clone();
        let mut conversations = self.store.state().conversations;
        conversations.insert(0, entry);
        self.store.dispatch(ChatAction::SetConversations(conversations));
        self.store
            .dispatch(ChatAction::SetActiveConversation(Some(id.clone())));
        id
    }

    /// Activate a conversation. Temporary ids never touch the network.
    pub async fn load_conversation(&self, id: ConversationId) -> Result<(), ClientError> {
        let server_id = match id {
            ConversationId::Temporary(_) => {
                let conversations = self
                    .store
                    .state()
                    .conversations
                    .into_iter()
                    .map(|mut c| {
                        if c.id == id {
                            c.messages.clear();
                        }
                        c
                    })
                    .collect();
                self.store.dispatch(ChatAction::SetConversations(conversations));
                self.store.dispatch(ChatAction::SetActiveConversation(Some(id)));
                return Ok(());
            }
            ConversationId::Server(server_id) => server_id,
        };

        self.store.dispatch(ChatAction::SetLoading(true));
        let result = self.api.get_conversation(server_id).await;
        match result {
            Ok(ref detail) => {
                let mut loaded = ConversationEntry::from_server(&detail.conversation);
                loaded.messages = detail
                    .messages
                    .iter()
                    .map(ChatMessageView::from_stored)
                    .collect();

                let mut conversations = self.store.state().conversations;
                match conversations.iter_mut().find(|c| c.id == id) {
                    Some(existing) => *existing = loaded,
                    None => conversations.insert(0, loaded),
                }
                self.store.dispatch(ChatAction::SetConversations(conversations));
                self.store.dispatch(ChatAction::SetActiveConversation(Some(id)));
            }
            Err(ref e) => self.fail(e).await,
        }
        self.store.dispatch(ChatAction::SetLoading(false));
        result.map(|_| ())
    }

    /// Delete a conversation. Temporary ones are only removed locally.
    pub async fn delete_conversation(&self, id: ConversationId) -> Result<(), ClientError> {
        if let ConversationId::Server(server_id) = id
            && let Err(e) = self.api.delete_conversation(server_id).await
        {
            self.fail(&e).await;
            return Err(e);
        }

        let state = self.store.state();
        let conversations = state
            .conversations
            .into_iter()
            .filter(|c| c.id != id)
            .collect();
        self.store.dispatch(ChatAction::SetConversations(conversations));
        if state.active.as_ref() == Some(&id) {
            self.store.dispatch(ChatAction::SetActiveConversation(None));
        }
        tracing::debug!(conversation = %id, "Conversation removed");
        Ok(())
    }

    /// Send `text` in the active conversation, starting one if none is
    /// active. Blank text is ignored.
    pub async fn send_message(&self, text: &str) -> Result<Option<ChatResponse>, ClientError> {
        if text.trim().is_empty() {
            return Ok(None);
        }

        let conversation = match self.store.state().active {
            Some(id) => id,
            None => self.new_conversation(),
        };

        let user_message_id = format!("temp-{}", Uuid::new_v4());
        self.store.dispatch(ChatAction::AddMessage(ChatMessageView {
            id: user_message_id.clone(),
            role: MessageRole::User,
            content: text.to_string(),
            created_at: Utc::now(),
            status: MessageStatus::Sending,
            tool_calls: Vec::new(),
        }));
        self.store.dispatch(ChatAction::SetTyping(true));

        let request = ChatRequest {
            user_id: self.user_id,
            message: text.to_string(),
            conversation_id: conversation.server_id(),
        };
        let result = self.api.send_message(&request).await;

        match result {
            Ok(ref response) => {
                self.store.dispatch(ChatAction::UpdateMessage {
                    id: user_message_id,
                    status: MessageStatus::Sent,
                });
                self.store
                    .dispatch(ChatAction::AddMessage(assistant_message(response)));

                if conversation.is_temporary() {
                    self.store.dispatch(ChatAction::ReconcileConversation {
                        temporary: conversation,
                        server_id: response.conversation_id,
                        title: Some(title_preview(text)),
                    });
                }
                if !response.success {
                    let message = response
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "The assistant could not answer".to_string());
                    self.store.dispatch(ChatAction::SetError(message));
                }
                if response
                    .tool_calls_executed
                    .iter()
                    .any(|call| call.name.contains("task"))
                {
                    let _ = self.task_refresh.send(TaskRefresh);
                }
            }
            Err(ref e) => {
                self.store.dispatch(ChatAction::UpdateMessage {
                    id: user_message_id,
                    status: MessageStatus::Error,
                });
                self.fail(e).await;
            }
        }

        self.store.dispatch(ChatAction::SetTyping(false));
        result.map(Some)
    }
}

fn assistant_message(response: &ChatResponse) -> ChatMessageView {
    let batch = Uuid::new_v4();
    ChatMessageView {
        id: format!("msg-{}", Uuid::new_v4()),
        role: response.message.role,
        content: response.message.content.clone(),
        created_at: Utc::now(),
        status: MessageStatus::Sent,
        tool_calls: response
            .tool_calls_executed
            .iter()
            .enumerate()
            .map(|(i, call)| ToolCallView::from_executed(format!("tc-{batch}-{i}"), call))
            .collect(),
    }
}
