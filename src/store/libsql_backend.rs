//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::params::Params;
use libsql::{Connection, Database as LibSqlDatabase, Value, params};
use tracing::{debug, info, warn};

use crate::auth::model::{User, UserCredentials};
use crate::chat::model::{Conversation, MessageRole, NewMessage, StoredMessage};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::Database;
use crate::tasks::model::{
    NewTask, Priority, SortField, SortOrder, Task, TaskFilters, TaskStatus,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    _db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            _db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical timestamp format. Fixed width so text ordering is chronological.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<&str>) -> Value {
    match s {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

fn opt_priority(p: Option<Priority>) -> Value {
    match p {
        Some(p) => Value::Integer(i64::from(u8::from(p))),
        None => Value::Null,
    }
}

fn opt_datetime(dt: Option<&DateTime<Utc>>) -> Value {
    match dt {
        Some(dt) => Value::Text(ts(dt)),
        None => Value::Null,
    }
}

/// `%term%` with LIKE wildcards in `term` escaped by `\`.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn col_err(column: &str, e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(format!("{column}: {e}"))
}

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

// ── Row mapping ─────────────────────────────────────────────────────

const USER_COLUMNS: &str = "id, email, full_name, created_at, password_hash";

const TASK_COLUMNS: &str =
    "id, user_id, title, description, priority, due_date, status, created_at, updated_at";

const CONVERSATION_COLUMNS: &str = "id, user_id, title, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, user_id, role, content, tool_calls, created_at";

fn row_to_credentials(row: &libsql::Row) -> Result<UserCredentials, DatabaseError> {
    let created: String = row.get(3).map_err(|e| col_err("user.created_at", e))?;
    Ok(UserCredentials {
        user: User {
            id: row.get(0).map_err(|e| col_err("user.id", e))?,
            email: row.get(1).map_err(|e| col_err("user.email", e))?,
            full_name: row.get::<String>(2).ok(),
            created_at: parse_datetime(&created),
        },
        password_hash: row.get(4).map_err(|e| col_err("user.password_hash", e))?,
    })
}

fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let status_str: String = row.get(6).map_err(|e| col_err("task.status", e))?;
    let status: TaskStatus = status_str
        .parse()
        .map_err(DatabaseError::Serialization)?;

    let priority = row
        .get::<i64>(4)
        .ok()
        .and_then(|p| u8::try_from(p).ok())
        .and_then(|p| Priority::try_from(p).ok());

    let due_date = row
        .get::<String>(5)
        .ok()
        .filter(|s| !s.is_empty())
        .map(|s| parse_datetime(&s));

    let created: String = row.get(7).map_err(|e| col_err("task.created_at", e))?;
    let updated: String = row.get(8).map_err(|e| col_err("task.updated_at", e))?;

    Ok(Task {
        id: row.get(0).map_err(|e| col_err("task.id", e))?,
        user_id: row.get(1).map_err(|e| col_err("task.user_id", e))?,
        title: row.get(2).map_err(|e| col_err("task.title", e))?,
        description: row.get::<String>(3).ok().filter(|s| !s.is_empty()),
        priority,
        due_date,
        status,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_conversation(row: &libsql::Row) -> Result<Conversation, DatabaseError> {
    let created: String = row.get(3).map_err(|e| col_err("conversation.created_at", e))?;
    let updated: String = row.get(4).map_err(|e| col_err("conversation.updated_at", e))?;
    Ok(Conversation {
        id: row.get(0).map_err(|e| col_err("conversation.id", e))?,
        user_id: row.get(1).map_err(|e| col_err("conversation.user_id", e))?,
        title: row.get::<String>(2).ok(),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_message(row: &libsql::Row) -> Result<StoredMessage, DatabaseError> {
    let role_str: String = row.get(3).map_err(|e| col_err("message.role", e))?;
    let role = MessageRole::parse(&role_str)
        .ok_or_else(|| DatabaseError::Serialization(format!("unknown message role: {role_str}")))?;
    let tool_calls = row
        .get::<String>(5)
        .ok()
        .filter(|s| !s.is_empty())
        .and_then(|s| serde_json::from_str(&s).ok());
    let created: String = row.get(6).map_err(|e| col_err("message.created_at", e))?;

    Ok(StoredMessage {
        id: row.get(0).map_err(|e| col_err("message.id", e))?,
        conversation_id: row.get(1).map_err(|e| col_err("message.conversation_id", e))?,
        user_id: row.get(2).map_err(|e| col_err("message.user_id", e))?,
        role,
        content: row.get(4).map_err(|e| col_err("message.content", e))?,
        tool_calls,
        created_at: parse_datetime(&created),
    })
}

async fn collect_tasks(mut rows: libsql::Rows, op: &str) -> Result<Vec<Task>, DatabaseError> {
    let mut tasks = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
    {
        tasks.push(row_to_task(&row)?);
    }
    Ok(tasks)
}

async fn collect_messages(
    mut rows: libsql::Rows,
    op: &str,
) -> Result<Vec<StoredMessage>, DatabaseError> {
    let mut messages = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
    {
        messages.push(row_to_message(&row)?);
    }
    Ok(messages)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        full_name: Option<&str>,
    ) -> Result<User, DatabaseError> {
        let now = Utc::now();
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO users (email, password_hash, full_name, created_at) \
                     VALUES (?1, ?2, ?3, ?4) RETURNING {USER_COLUMNS}"
                ),
                params![email, password_hash, opt_text(full_name), ts(&now)],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DatabaseError::Constraint("Email already registered".to_string())
                } else {
                    DatabaseError::Query(format!("create_user: {e}"))
                }
            })?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("create_user: {e}")))?
            .ok_or_else(|| DatabaseError::Query("create_user: no row returned".to_string()))?;
        let creds = row_to_credentials(&row)?;
        debug!(user_id = creds.user.id, "User created");
        Ok(creds.user)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_credentials(&row)?.user)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user: {e}"))),
        }
    }

    async fn get_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserCredentials>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user_by_email: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_credentials(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user_by_email: {e}"))),
        }
    }

    // ── Tasks ───────────────────────────────────────────────────────

    async fn create_task(&self, user_id: i64, task: &NewTask) -> Result<Task, DatabaseError> {
        let now = ts(&Utc::now());
        let status = task.status.unwrap_or(TaskStatus::Pending);
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO tasks (user_id, title, description, priority, due_date, status, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7) RETURNING {TASK_COLUMNS}"
                ),
                params![
                    user_id,
                    task.title.trim(),
                    opt_text(task.description.as_deref()),
                    opt_priority(task.priority),
                    opt_datetime(task.due_date.as_ref()),
                    status.as_str(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_task: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("create_task: {e}")))?
            .ok_or_else(|| DatabaseError::Query("create_task: no row returned".to_string()))?;
        let created = row_to_task(&row)?;
        debug!(task_id = created.id, user_id, "Task created");
        Ok(created)
    }

    async fn get_task(&self, user_id: i64, id: i64) -> Result<Option<Task>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_task(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_task: {e}"))),
        }
    }

    async fn list_tasks(
        &self,
        user_id: i64,
        filters: &TaskFilters,
    ) -> Result<Vec<Task>, DatabaseError> {
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE user_id = ?1");
        let mut values = vec![Value::Integer(user_id)];

        if let Some(status) = filters.status {
            values.push(Value::Text(status.as_str().to_string()));
            sql.push_str(&format!(" AND status = ?{}", values.len()));
        }
        if let Some(priority) = filters.priority {
            values.push(opt_priority(Some(priority)));
            sql.push_str(&format!(" AND priority = ?{}", values.len()));
        }
        if let Some(term) = filters.search_term() {
            values.push(Value::Text(like_pattern(term)));
            let n = values.len();
            sql.push_str(&format!(
                " AND (title LIKE ?{n} ESCAPE '\\' OR description LIKE ?{n} ESCAPE '\\')"
            ));
        }

        let sort_by = filters.sort_by.unwrap_or(SortField::CreatedAt);
        let order = filters.sort_order.unwrap_or(if filters.sort_by.is_some() {
            SortOrder::Asc
        } else {
            SortOrder::Desc
        });
        sql.push_str(&format!(
            " ORDER BY {} {kw}, id {kw}",
            sort_by.column(),
            kw = order.keyword()
        ));

        let rows = self
            .conn()
            .query(&sql, Params::Positional(values))
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks: {e}")))?;
        collect_tasks(rows, "list_tasks").await
    }

    async fn find_tasks_by_title(
        &self,
        user_id: i64,
        fragment: &str,
    ) -> Result<Vec<Task>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE user_id = ?1 AND title LIKE ?2 ESCAPE '\\' ORDER BY id"
                ),
                params![user_id, like_pattern(fragment.trim())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_tasks_by_title: {e}")))?;
        collect_tasks(rows, "find_tasks_by_title").await
    }

    async fn update_task(&self, task: &Task) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE tasks SET title = ?1, description = ?2, priority = ?3, due_date = ?4, \
                 status = ?5, updated_at = ?6 WHERE id = ?7 AND user_id = ?8",
                params![
                    task.title.as_str(),
                    opt_text(task.description.as_deref()),
                    opt_priority(task.priority),
                    opt_datetime(task.due_date.as_ref()),
                    task.status.as_str(),
                    ts(&task.updated_at),
                    task.id,
                    task.user_id,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_task: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "Task".to_string(),
                id: task.id.to_string(),
            });
        }
        debug!(task_id = task.id, status = %task.status, "Task updated");
        Ok(())
    }

    async fn delete_task(&self, user_id: i64, id: i64) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_task: {e}")))?;
        Ok(affected > 0)
    }

    // ── Conversations ───────────────────────────────────────────────

    async fn create_conversation(
        &self,
        user_id: i64,
        title: Option<&str>,
    ) -> Result<Conversation, DatabaseError> {
        let now = ts(&Utc::now());
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO conversations (user_id, title, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?3) RETURNING {CONVERSATION_COLUMNS}"
                ),
                params![user_id, opt_text(title), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_conversation: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("create_conversation: {e}")))?
            .ok_or_else(|| {
                DatabaseError::Query("create_conversation: no row returned".to_string())
            })?;
        row_to_conversation(&row)
    }

    async fn get_conversation(
        &self,
        user_id: i64,
        id: i64,
    ) -> Result<Option<Conversation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1 AND user_id = ?2"
                ),
                params![id, user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_conversation: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_conversation(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_conversation: {e}"))),
        }
    }

    async fn list_conversations(&self, user_id: i64) -> Result<Vec<Conversation>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE user_id = ?1 \
                     ORDER BY updated_at DESC, id DESC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_conversations: {e}")))?;

        let mut conversations = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_conversations: {e}")))?
        {
            conversations.push(row_to_conversation(&row)?);
        }
        Ok(conversations)
    }

    async fn delete_conversation(&self, user_id: i64, id: i64) -> Result<bool, DatabaseError> {
        let query_err = |e: libsql::Error| DatabaseError::Query(format!("delete_conversation: {e}"));

        // Messages and conversation go together or not at all.
        let tx = self.conn().transaction().await.map_err(query_err)?;
        let deleted = async {
            tx.execute(
                "DELETE FROM messages WHERE conversation_id = \
                 (SELECT id FROM conversations WHERE id = ?1 AND user_id = ?2)",
                params![id, user_id],
            )
            .await?;
            tx.execute(
                "DELETE FROM conversations WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .await
        }
        .await;

        match deleted {
            Ok(affected) => {
                tx.commit().await.map_err(query_err)?;
                debug!(conversation_id = id, "Conversation deleted");
                Ok(affected > 0)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(conversation_id = id, error = %rollback, "Rollback failed");
                }
                Err(query_err(e))
            }
        }
    }

    async fn touch_conversation(&self, id: i64) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![ts(&Utc::now()), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("touch_conversation: {e}")))?;
        Ok(())
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn add_message(&self, message: &NewMessage) -> Result<StoredMessage, DatabaseError> {
        let tool_calls = match &message.tool_calls {
            Some(v) => Value::Text(
                serde_json::to_string(v)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
            ),
            None => Value::Null,
        };
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "INSERT INTO messages (conversation_id, user_id, role, content, tool_calls, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING {MESSAGE_COLUMNS}"
                ),
                params![
                    message.conversation_id,
                    message.user_id,
                    message.role.as_str(),
                    message.content.as_str(),
                    tool_calls,
                    ts(&Utc::now()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("add_message: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("add_message: {e}")))?
            .ok_or_else(|| DatabaseError::Query("add_message: no row returned".to_string()))?;
        row_to_message(&row)
    }

    async fn list_messages(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<StoredMessage>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 \
                     ORDER BY created_at ASC, id ASC"
                ),
                params![conversation_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_messages: {e}")))?;
        collect_messages(rows, "list_messages").await
    }

    async fn recent_messages(
        &self,
        conversation_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1 \
                     ORDER BY created_at DESC, id DESC LIMIT ?2"
                ),
                params![conversation_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("recent_messages: {e}")))?;
        let mut messages = collect_messages(rows, "recent_messages").await?;
        messages.reverse();
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    async fn user(db: &LibSqlBackend, email: &str) -> User {
        db.create_user(email, "hash", None).await.unwrap()
    }

    fn message(conversation_id: i64, user_id: i64, role: MessageRole, content: &str) -> NewMessage {
        NewMessage {
            conversation_id,
            user_id,
            role,
            content: content.to_string(),
            tool_calls: None,
        }
    }

    // ── Users ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_and_lookup_user() {
        let db = test_db().await;
        let created = db
            .create_user("alice@example.com", "phc-hash", Some("Alice"))
            .await
            .unwrap();
        assert_eq!(created.full_name.as_deref(), Some("Alice"));

        let creds = db.get_user_by_email("alice@example.com").await.unwrap().unwrap();
        assert_eq!(creds.user.id, created.id);
        assert_eq!(creds.password_hash, "phc-hash");

        let by_id = db.get_user(created.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "alice@example.com");
        assert!(db.get_user_by_email("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_constraint_error() {
        let db = test_db().await;
        user(&db, "dup@example.com").await;
        let err = db.create_user("dup@example.com", "h", None).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    // ── Tasks ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_task_defaults_to_pending() {
        let db = test_db().await;
        let u = user(&db, "a@example.com").await;
        let task = db
            .create_task(u.id, &NewTask::new("Buy milk").with_priority(Priority::High))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, Some(Priority::High));
        assert_eq!(task.user_id, u.id);

        let fetched = db.get_task(u.id, task.id).await.unwrap().unwrap();
        assert_eq!(fetched, task);
    }

    #[tokio::test]
    async fn tasks_are_isolated_per_user() {
        let db = test_db().await;
        let alice = user(&db, "alice@example.com").await;
        let bob = user(&db, "bob@example.com").await;
        let task = db.create_task(alice.id, &NewTask::new("Secret")).await.unwrap();

        assert!(db.get_task(bob.id, task.id).await.unwrap().is_none());
        assert!(db.list_tasks(bob.id, &TaskFilters::default()).await.unwrap().is_empty());
        assert!(!db.delete_task(bob.id, task.id).await.unwrap());

        let mut stolen = task.clone();
        stolen.user_id = bob.id;
        stolen.title = "Mine now".into();
        let err = db.update_task(&stolen).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
        assert_eq!(db.get_task(alice.id, task.id).await.unwrap().unwrap().title, "Secret");
    }

    #[tokio::test]
    async fn update_and_delete_task() {
        let db = test_db().await;
        let u = user(&db, "a@example.com").await;
        let mut task = db.create_task(u.id, &NewTask::new("Draft")).await.unwrap();

        task.status = TaskStatus::InProgress;
        task.description = Some("first pass".into());
        task.updated_at = Utc::now();
        db.update_task(&task).await.unwrap();

        let fetched = db.get_task(u.id, task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::InProgress);
        assert_eq!(fetched.description.as_deref(), Some("first pass"));

        assert!(db.delete_task(u.id, task.id).await.unwrap());
        assert!(db.get_task(u.id, task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_tasks_filters_and_sorts() {
        let db = test_db().await;
        let u = user(&db, "a@example.com").await;
        db.create_task(u.id, &NewTask::new("Write report").with_priority(Priority::Low))
            .await
            .unwrap();
        db.create_task(
            u.id,
            &NewTask::new("Call mom")
                .with_priority(Priority::High)
                .with_status(TaskStatus::Completed),
        )
        .await
        .unwrap();
        db.create_task(
            u.id,
            &NewTask::new("Groceries").with_description("milk and REPORT paper"),
        )
        .await
        .unwrap();

        let completed = db
            .list_tasks(
                u.id,
                &TaskFilters {
                    status: Some(TaskStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].title, "Call mom");

        let searched = db
            .list_tasks(
                u.id,
                &TaskFilters {
                    search: Some("report".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(searched.len(), 2);

        let by_title = db
            .list_tasks(
                u.id,
                &TaskFilters {
                    sort_by: Some(SortField::Title),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let titles: Vec<_> = by_title.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["Call mom", "Groceries", "Write report"]);

        let high = db
            .list_tasks(
                u.id,
                &TaskFilters {
                    priority: Some(Priority::High),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(high.len(), 1);
    }

    #[tokio::test]
    async fn default_order_is_newest_first() {
        let db = test_db().await;
        let u = user(&db, "a@example.com").await;
        let first = db.create_task(u.id, &NewTask::new("first")).await.unwrap();
        let second = db.create_task(u.id, &NewTask::new("second")).await.unwrap();
        let tasks = db.list_tasks(u.id, &TaskFilters::default()).await.unwrap();
        assert_eq!(tasks[0].id, second.id);
        assert_eq!(tasks[1].id, first.id);
    }

    #[tokio::test]
    async fn search_treats_wildcards_literally() {
        let db = test_db().await;
        let u = user(&db, "a@example.com").await;
        db.create_task(u.id, &NewTask::new("100% done")).await.unwrap();
        db.create_task(u.id, &NewTask::new("1000 things")).await.unwrap();
        let found = db.find_tasks_by_title(u.id, "0%").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "100% done");
    }

    #[tokio::test]
    async fn find_by_title_is_case_insensitive() {
        let db = test_db().await;
        let u = user(&db, "a@example.com").await;
        db.create_task(u.id, &NewTask::new("Buy Milk")).await.unwrap();
        db.create_task(u.id, &NewTask::new("Buy bread")).await.unwrap();
        assert_eq!(db.find_tasks_by_title(u.id, "milk").await.unwrap().len(), 1);
        assert_eq!(db.find_tasks_by_title(u.id, "buy").await.unwrap().len(), 2);
    }

    // ── Conversations ───────────────────────────────────────────────

    #[tokio::test]
    async fn conversation_messages_round_trip() {
        let db = test_db().await;
        let u = user(&db, "a@example.com").await;
        let conv = db.create_conversation(u.id, Some("Hello")).await.unwrap();

        let mut with_tools = message(conv.id, u.id, MessageRole::User, "add milk");
        with_tools.tool_calls = Some(serde_json::json!([{"name": "add_task"}]));
        db.add_message(&with_tools).await.unwrap();
        db.add_message(&message(conv.id, u.id, MessageRole::Assistant, "Added."))
            .await
            .unwrap();

        let messages = db.list_messages(conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].tool_calls.as_ref().unwrap()[0]["name"], "add_task");
        assert_eq!(messages[1].content, "Added.");
    }

    #[tokio::test]
    async fn recent_messages_returns_tail_in_order() {
        let db = test_db().await;
        let u = user(&db, "a@example.com").await;
        let conv = db.create_conversation(u.id, None).await.unwrap();
        for i in 0..15 {
            db.add_message(&message(conv.id, u.id, MessageRole::User, &format!("m{i}")))
                .await
                .unwrap();
        }
        let recent = db.recent_messages(conv.id, 10).await.unwrap();
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].content, "m5");
        assert_eq!(recent[9].content, "m14");
    }

    #[tokio::test]
    async fn conversations_are_isolated_and_deletable() {
        let db = test_db().await;
        let alice = user(&db, "alice@example.com").await;
        let bob = user(&db, "bob@example.com").await;
        let conv = db.create_conversation(alice.id, None).await.unwrap();
        db.add_message(&message(conv.id, alice.id, MessageRole::User, "hi"))
            .await
            .unwrap();

        assert!(db.get_conversation(bob.id, conv.id).await.unwrap().is_none());
        assert!(!db.delete_conversation(bob.id, conv.id).await.unwrap());
        assert_eq!(db.list_conversations(alice.id).await.unwrap().len(), 1);
        assert_eq!(db.list_messages(conv.id).await.unwrap().len(), 1);

        assert!(db.delete_conversation(alice.id, conv.id).await.unwrap());
        assert!(db.list_conversations(alice.id).await.unwrap().is_empty());
        assert!(db.list_messages(conv.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_conversation_delete_keeps_messages() {
        let db = test_db().await;
        let alice = user(&db, "alice@example.com").await;
        let conv = db.create_conversation(alice.id, None).await.unwrap();
        db.add_message(&message(conv.id, alice.id, MessageRole::User, "hi"))
            .await
            .unwrap();
        db.conn()
            .execute(
                "CREATE TRIGGER keep_conversations BEFORE DELETE ON conversations \
                 BEGIN SELECT RAISE(ABORT, 'locked'); END",
                (),
            )
            .await
            .unwrap();

        assert!(db.delete_conversation(alice.id, conv.id).await.is_err());
        assert_eq!(db.list_messages(conv.id).await.unwrap().len(), 1);
        assert!(db.get_conversation(alice.id, conv.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn touch_reorders_conversations() {
        let db = test_db().await;
        let u = user(&db, "a@example.com").await;
        let older = db.create_conversation(u.id, Some("older")).await.unwrap();
        let _newer = db.create_conversation(u.id, Some("newer")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        db.touch_conversation(older.id).await.unwrap();
        let list = db.list_conversations(u.id).await.unwrap();
        assert_eq!(list[0].id, older.id);
    }

    #[tokio::test]
    async fn local_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("taskflow.db");
        {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            db.create_user("file@example.com", "h", None).await.unwrap();
        }
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert!(db.get_user_by_email("file@example.com").await.unwrap().is_some());
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("a%b_c"), "%a\\%b\\_c%");
    }
}
