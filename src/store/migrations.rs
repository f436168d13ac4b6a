//! Schema migrations for the TaskFlow database.
//!
//! Steps are numbered from 1 and recorded in `schema_migrations`. Each
//! pending step runs in its own transaction together with its record, so a
//! failed step leaves the schema at the previous version.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Append only. Never edit a step that has shipped.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                full_name TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT,
                priority INTEGER,
                due_date TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_user_status ON tasks(user_id, status);
        "#,
    },
    Migration {
        version: 2,
        name: "chat_history",
        sql: r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id);

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                user_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                tool_calls TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, created_at);
        "#,
    },
];

/// Bring the schema up to the latest version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("cannot create schema_migrations: {e}")))?;

    let from = schema_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > from).collect();
    if pending.is_empty() {
        tracing::debug!(version = from, "Schema up to date");
        return Ok(());
    }

    for step in pending {
        tracing::info!(version = step.version, name = step.name, "Migrating schema");
        apply(conn, step).await?;
    }
    Ok(())
}

async fn apply(conn: &Connection, step: &Migration) -> Result<(), DatabaseError> {
    let fail = |e: libsql::Error| {
        DatabaseError::Migration(format!("step {} ({}): {e}", step.version, step.name))
    };

    let tx = conn.transaction().await.map_err(fail)?;
    tx.execute_batch(step.sql).await.map_err(fail)?;
    tx.execute(
        "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
        libsql::params![step.version, step.name],
    )
    .await
    .map_err(fail)?;
    tx.commit().await.map_err(fail)
}

/// Highest applied step, 0 for a fresh database.
async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("cannot read schema version: {e}")))?;

    let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("cannot read schema version: {e}")))?
    else {
        return Ok(0);
    };
    row.get::<i64>(0)
        .map_err(|e| DatabaseError::Migration(format!("bad schema version: {e}")))
}
