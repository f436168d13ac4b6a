//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;

use crate::auth::model::{User, UserCredentials};
use crate::chat::model::{Conversation, NewMessage, StoredMessage};
use crate::error::DatabaseError;
use crate::tasks::model::{NewTask, Task, TaskFilters};

/// Backend-agnostic database trait covering users, tasks and conversations.
///
/// Every task and conversation accessor takes the owning `user_id` and only
/// ever sees that user's rows.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    /// Insert a user. Fails with `DatabaseError::Constraint` on a duplicate email.
    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        full_name: Option<&str>,
    ) -> Result<User, DatabaseError>;

    async fn get_user(&self, id: i64) -> Result<Option<User>, DatabaseError>;

    /// Look up a user together with the stored password hash.
    async fn get_user_by_email(&self, email: &str)
    -> Result<Option<UserCredentials>, DatabaseError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Insert a task. Status defaults to pending.
    async fn create_task(&self, user_id: i64, task: &NewTask) -> Result<Task, DatabaseError>;

    async fn get_task(&self, user_id: i64, id: i64) -> Result<Option<Task>, DatabaseError>;

    /// List a user's tasks matching `filters`, newest first unless a sort is given.
    async fn list_tasks(&self, user_id: i64, filters: &TaskFilters)
    -> Result<Vec<Task>, DatabaseError>;

    /// Tasks whose title contains `fragment`, case-insensitively.
    async fn find_tasks_by_title(
        &self,
        user_id: i64,
        fragment: &str,
    ) -> Result<Vec<Task>, DatabaseError>;

    /// Persist every mutable field of `task`. Fails with `NotFound` if the
    /// task does not belong to `task.user_id`.
    async fn update_task(&self, task: &Task) -> Result<(), DatabaseError>;

    /// Delete a task. Returns `false` if it did not exist for this user.
    async fn delete_task(&self, user_id: i64, id: i64) -> Result<bool, DatabaseError>;

    // ── Conversations ───────────────────────────────────────────────

    async fn create_conversation(
        &self,
        user_id: i64,
        title: Option<&str>,
    ) -> Result<Conversation, DatabaseError>;

    async fn get_conversation(
        &self,
        user_id: i64,
        id: i64,
    ) -> Result<Option<Conversation>, DatabaseError>;

    /// A user's conversations, most recently updated first.
    async fn list_conversations(&self, user_id: i64) -> Result<Vec<Conversation>, DatabaseError>;

    /// Delete a conversation and its messages. Returns `false` if not found.
    async fn delete_conversation(&self, user_id: i64, id: i64) -> Result<bool, DatabaseError>;

    /// Bump `updated_at` on a conversation.
    async fn touch_conversation(&self, id: i64) -> Result<(), DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    async fn add_message(&self, message: &NewMessage) -> Result<StoredMessage, DatabaseError>;

    /// All messages of a conversation, oldest first.
    async fn list_messages(&self, conversation_id: i64)
    -> Result<Vec<StoredMessage>, DatabaseError>;

    /// The last `limit` messages of a conversation, oldest first.
    async fn recent_messages(
        &self,
        conversation_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, DatabaseError>;
}
