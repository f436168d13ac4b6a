//! Task tools: let the assistant add, list, search, update, complete and
//! delete the current user's tasks.
//!
//! Every result is a JSON object with `success` and a human-readable
//! `message`. Lookups that find nothing, or too much, are reported as
//! `success: false` results rather than errors so the model can recover.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::DatabaseError;
use crate::store::Database;
use crate::tasks::model::{NewTask, Priority, Task, TaskFilters, TaskPatch, TaskStatus};
use crate::tools::registry::ToolRegistry;
use crate::tools::tool::{
    Tool, ToolContext, ToolError, ToolOutput, optional_i64, optional_str, require_str,
};

/// Maximum number of candidates listed when a title matches several tasks.
const MAX_LISTED_MATCHES: usize = 5;

/// Register all task tools against `db`.
pub fn register_task_tools(registry: &ToolRegistry, db: Arc<dyn Database>) {
    registry.register_sync(Arc::new(AddTaskTool::new(Arc::clone(&db))));
    registry.register_sync(Arc::new(ListTasksTool::new(Arc::clone(&db))));
    registry.register_sync(Arc::new(SearchTasksTool::new(Arc::clone(&db))));
    registry.register_sync(Arc::new(UpdateTaskTool::new(Arc::clone(&db))));
    registry.register_sync(Arc::new(CompleteTaskTool::new(Arc::clone(&db))));
    registry.register_sync(Arc::new(DeleteTaskTool::new(db)));
}

fn db_error(tool: &str, e: DatabaseError) -> ToolError {
    ToolError::ExecutionFailed {
        name: tool.to_string(),
        reason: e.to_string(),
    }
}

fn task_json(task: &Task) -> Value {
    json!({
        "id": task.id,
        "title": task.title,
        "description": task.description,
        "status": task.status,
        "priority": task.priority,
        "priority_label": task.priority.map(|p| p.label()),
        "due_date": task.due_date,
    })
}

/// Accept `1`-`3`, `"1"`-`"3"` or `"high"`/`"medium"`/`"low"`.
fn parse_priority(value: &Value) -> Option<Priority> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u8::try_from(n).ok())
            .and_then(|n| Priority::try_from(n).ok()),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "1" | "high" => Some(Priority::High),
            "2" | "medium" => Some(Priority::Medium),
            "3" | "low" => Some(Priority::Low),
            _ => None,
        },
        _ => None,
    }
}

enum StatusArg {
    Absent,
    Valid(TaskStatus),
    Invalid(String),
}

fn status_arg(params: &Value) -> StatusArg {
    match optional_str(params, "status") {
        None => StatusArg::Absent,
        Some(raw) => match TaskStatus::normalize(raw) {
            Some(status) => StatusArg::Valid(status),
            None => StatusArg::Invalid(raw.to_string()),
        },
    }
}

fn invalid_status(raw: &str, start: Instant) -> ToolOutput {
    ToolOutput::failure(
        "Invalid status",
        format!("Unknown status '{raw}'. Use pending, in-progress or completed."),
        start.elapsed(),
    )
}

enum Lookup {
    Found(Task),
    Failed(ToolOutput),
}

/// Find the target task by `task_id`, or by a case-insensitive partial
/// match on `title` when no id is given.
async fn resolve_task(
    db: &dyn Database,
    tool: &str,
    user_id: i64,
    params: &Value,
    start: Instant,
) -> Result<Lookup, ToolError> {
    if let Some(id) = optional_i64(params, "task_id") {
        return match db.get_task(user_id, id).await.map_err(|e| db_error(tool, e))? {
            Some(task) => Ok(Lookup::Found(task)),
            None => Ok(Lookup::Failed(ToolOutput::failure(
                "Task not found",
                format!("Task with ID {id} not found."),
                start.elapsed(),
            ))),
        };
    }

    let Some(title) = optional_str(params, "title") else {
        return Ok(Lookup::Failed(ToolOutput::failure(
            "Missing parameters",
            "Either task_id or title must be provided.",
            start.elapsed(),
        )));
    };

    let mut matches = db
        .find_tasks_by_title(user_id, title)
        .await
        .map_err(|e| db_error(tool, e))?;
    match matches.len() {
        0 => Ok(Lookup::Failed(ToolOutput::failure(
            "Task not found",
            format!("No task found with title containing '{title}'."),
            start.elapsed(),
        ))),
        1 => Ok(Lookup::Found(matches.remove(0))),
        _ => {
            let listed: Vec<String> = matches
                .iter()
                .take(MAX_LISTED_MATCHES)
                .map(|t| format!("'{}' (ID: {})", t.title, t.id))
                .collect();
            Ok(Lookup::Failed(ToolOutput::failure(
                "Multiple tasks found",
                format!(
                    "Multiple tasks match '{title}': {}. Please use the task ID or be more specific.",
                    listed.join(", ")
                ),
                start.elapsed(),
            )))
        }
    }
}

/// Render a numbered task list for the model to summarise.
fn describe_tasks(tasks: &[Task]) -> String {
    let mut out = String::new();
    for (i, task) in tasks.iter().enumerate() {
        out.push_str(&format!("{}. {} (ID: {}, status: {}", i + 1, task.title, task.id, task.status));
        if let Some(p) = task.priority {
            out.push_str(&format!(", priority: {}", p.label()));
        }
        out.push(')');
        if let Some(ref d) = task.description {
            out.push_str(&format!("\n   {d}"));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

// ── add_task ────────────────────────────────────────────────────────

pub struct AddTaskTool {
    db: Arc<dyn Database>,
}

impl AddTaskTool {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for AddTaskTool {
    fn name(&self) -> &str {
        "add_task"
    }

    fn description(&self) -> &str {
        "Create a new task for the user. New tasks start in the pending column."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string", "description": "Short title of the task"},
                "description": {"type": "string", "description": "Optional details"},
                "priority": {
                    "type": "integer",
                    "enum": [1, 2, 3],
                    "description": "1 = high, 2 = medium, 3 = low"
                }
            },
            "required": ["title"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let title = require_str(&params, "title")?;

        let mut new_task = NewTask::new(title);
        if let Some(d) = optional_str(&params, "description") {
            new_task = new_task.with_description(d);
        }
        if let Some(p) = params.get("priority").and_then(parse_priority) {
            new_task = new_task.with_priority(p);
        }
        if let Err(e) = new_task.validate() {
            return Ok(ToolOutput::failure(
                "Validation failed",
                format!("Failed to create task: {e}"),
                start.elapsed(),
            ));
        }

        let task = self
            .db
            .create_task(ctx.user_id, &new_task)
            .await
            .map_err(|e| db_error(self.name(), e))?;
        tracing::info!(task_id = task.id, user_id = ctx.user_id, "Assistant added task");

        Ok(ToolOutput::success(
            json!({
                "success": true,
                "task_id": task.id,
                "task": task_json(&task),
                "message": format!("Task '{}' has been created successfully!", task.title),
            }),
            start.elapsed(),
        ))
    }
}

// ── list_tasks ──────────────────────────────────────────────────────

pub struct ListTasksTool {
    db: Arc<dyn Database>,
}

impl ListTasksTool {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for ListTasksTool {
    fn name(&self) -> &str {
        "list_tasks"
    }

    fn description(&self) -> &str {
        "List the user's tasks, newest first, optionally filtered by status."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["all", "pending", "in-progress", "completed"],
                    "description": "Only return tasks with this status (default: all)"
                }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let status = match optional_str(&params, "status") {
            None => None,
            Some(s) if s.eq_ignore_ascii_case("all") => None,
            Some(_) => match status_arg(&params) {
                StatusArg::Valid(s) => Some(s),
                StatusArg::Invalid(raw) => return Ok(invalid_status(&raw, start)),
                StatusArg::Absent => None,
            },
        };

        let filters = TaskFilters {
            status,
            ..Default::default()
        };
        let tasks = self
            .db
            .list_tasks(ctx.user_id, &filters)
            .await
            .map_err(|e| db_error(self.name(), e))?;

        let scope = status.map(|s| format!(" ({s})")).unwrap_or_default();
        let message = if tasks.is_empty() {
            format!("You have 0 task(s){scope}.")
        } else {
            format!(
                "You have {} task(s){scope}:\n{}",
                tasks.len(),
                describe_tasks(&tasks)
            )
        };

        Ok(ToolOutput::success(
            json!({
                "success": true,
                "count": tasks.len(),
                "tasks": tasks.iter().map(task_json).collect::<Vec<_>>(),
                "message": message,
            }),
            start.elapsed(),
        ))
    }
}

// ── search_tasks ────────────────────────────────────────────────────

pub struct SearchTasksTool {
    db: Arc<dyn Database>,
}

impl SearchTasksTool {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for SearchTasksTool {
    fn name(&self) -> &str {
        "search_tasks"
    }

    fn description(&self) -> &str {
        "Search the user's tasks by text in the title or description."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Text to look for"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let query = require_str(&params, "query")?;
        let filters = TaskFilters {
            search: Some(query.to_string()),
            ..Default::default()
        };
        let tasks = self
            .db
            .list_tasks(ctx.user_id, &filters)
            .await
            .map_err(|e| db_error(self.name(), e))?;

        let message = if tasks.is_empty() {
            format!("No tasks match '{query}'.")
        } else {
            format!(
                "Found {} task(s) matching '{query}':\n{}",
                tasks.len(),
                describe_tasks(&tasks)
            )
        };

        Ok(ToolOutput::success(
            json!({
                "success": true,
                "count": tasks.len(),
                "tasks": tasks.iter().map(task_json).collect::<Vec<_>>(),
                "message": message,
            }),
            start.elapsed(),
        ))
    }
}

// ── update_task ─────────────────────────────────────────────────────

pub struct UpdateTaskTool {
    db: Arc<dyn Database>,
}

impl UpdateTaskTool {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for UpdateTaskTool {
    fn name(&self) -> &str {
        "update_task"
    }

    fn description(&self) -> &str {
        "Update a task's title, description, status or priority. Identify the task by \
         task_id, or by (part of) its current title when the id is unknown."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {"type": "integer", "description": "ID of the task to update"},
                "title": {
                    "type": "string",
                    "description": "Without task_id: text of the current title used to find the task. With task_id: the new title."
                },
                "new_title": {"type": "string", "description": "New title for the task"},
                "description": {"type": "string", "description": "New description"},
                "status": {
                    "type": "string",
                    "enum": ["pending", "in-progress", "completed"],
                    "description": "New status"
                },
                "priority": {
                    "type": "integer",
                    "enum": [1, 2, 3],
                    "description": "1 = high, 2 = medium, 3 = low"
                }
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();

        let status = match status_arg(&params) {
            StatusArg::Absent => None,
            StatusArg::Valid(s) => Some(s),
            StatusArg::Invalid(raw) => return Ok(invalid_status(&raw, start)),
        };

        let by_id = optional_i64(&params, "task_id").is_some();
        let new_title = optional_str(&params, "new_title")
            .or_else(|| by_id.then(|| optional_str(&params, "title")).flatten())
            .map(str::to_string);

        let patch = TaskPatch {
            title: new_title,
            description: optional_str(&params, "description").map(|d| Some(d.to_string())),
            priority: params.get("priority").and_then(parse_priority).map(Some),
            status,
            ..Default::default()
        };
        if patch.is_empty() {
            return Ok(ToolOutput::failure(
                "No updates provided",
                "Tell me what to change: title, description, status or priority.",
                start.elapsed(),
            ));
        }
        if let Err(e) = patch.validate() {
            return Ok(ToolOutput::failure(
                "Validation failed",
                format!("Failed to update task: {e}"),
                start.elapsed(),
            ));
        }

        let mut task =
            match resolve_task(self.db.as_ref(), self.name(), ctx.user_id, &params, start).await? {
                Lookup::Found(task) => task,
                Lookup::Failed(output) => return Ok(output),
            };

        task.apply(&patch);
        self.db
            .update_task(&task)
            .await
            .map_err(|e| db_error(self.name(), e))?;
        tracing::info!(task_id = task.id, user_id = ctx.user_id, "Assistant updated task");

        Ok(ToolOutput::success(
            json!({
                "success": true,
                "task_id": task.id,
                "task": task_json(&task),
                "message": format!("Task '{}' has been updated successfully!", task.title),
            }),
            start.elapsed(),
        ))
    }
}

// ── complete_task ───────────────────────────────────────────────────

pub struct CompleteTaskTool {
    db: Arc<dyn Database>,
}

impl CompleteTaskTool {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for CompleteTaskTool {
    fn name(&self) -> &str {
        "complete_task"
    }

    fn description(&self) -> &str {
        "Mark a task as completed, moving it to the Done column."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {"type": "integer", "description": "ID of the task to complete"},
                "title": {"type": "string", "description": "Part of the task title, if the id is unknown"}
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let mut task =
            match resolve_task(self.db.as_ref(), self.name(), ctx.user_id, &params, start).await? {
                Lookup::Found(task) => task,
                Lookup::Failed(output) => return Ok(output),
            };

        task.apply(&TaskPatch::status(TaskStatus::Completed));
        self.db
            .update_task(&task)
            .await
            .map_err(|e| db_error(self.name(), e))?;
        tracing::info!(task_id = task.id, user_id = ctx.user_id, "Assistant completed task");

        Ok(ToolOutput::success(
            json!({
                "success": true,
                "task_id": task.id,
                "message": format!("Task '{}' has been marked as completed!", task.title),
            }),
            start.elapsed(),
        ))
    }
}

// ── delete_task ─────────────────────────────────────────────────────

pub struct DeleteTaskTool {
    db: Arc<dyn Database>,
}

impl DeleteTaskTool {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Tool for DeleteTaskTool {
    fn name(&self) -> &str {
        "delete_task"
    }

    fn description(&self) -> &str {
        "Delete a task permanently. Identify it by task_id or by part of its title."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {"type": "integer", "description": "ID of the task to delete"},
                "title": {"type": "string", "description": "Part of the task title, if the id is unknown"}
            }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let start = Instant::now();
        let task =
            match resolve_task(self.db.as_ref(), self.name(), ctx.user_id, &params, start).await? {
                Lookup::Found(task) => task,
                Lookup::Failed(output) => return Ok(output),
            };

        self.db
            .delete_task(ctx.user_id, task.id)
            .await
            .map_err(|e| db_error(self.name(), e))?;
        tracing::info!(task_id = task.id, user_id = ctx.user_id, "Assistant deleted task");

        Ok(ToolOutput::success(
            json!({
                "success": true,
                "task_id": task.id,
                "message": format!("Task '{}' has been deleted successfully!", task.title),
            }),
            start.elapsed(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    async fn setup() -> (Arc<dyn Database>, ToolContext) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let user = db.create_user("tools@example.com", "h", None).await.unwrap();
        (db, ToolContext { user_id: user.id })
    }

    #[tokio::test]
    async fn add_task_creates_pending_task() {
        let (db, ctx) = setup().await;
        let out = AddTaskTool::new(Arc::clone(&db))
            .execute(json!({"title": "Buy milk", "priority": "high"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.result["success"], true);
        assert_eq!(out.result["message"], "Task 'Buy milk' has been created successfully!");

        let id = out.result["task_id"].as_i64().unwrap();
        let task = db.get_task(ctx.user_id, id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, Some(Priority::High));
    }

    #[tokio::test]
    async fn add_task_requires_title() {
        let (db, ctx) = setup().await;
        let err = AddTaskTool::new(db).execute(json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn list_tasks_filters_by_normalized_status() {
        let (db, ctx) = setup().await;
        db.create_task(ctx.user_id, &NewTask::new("a")).await.unwrap();
        db.create_task(ctx.user_id, &NewTask::new("b").with_status(TaskStatus::Completed))
            .await
            .unwrap();

        let tool = ListTasksTool::new(Arc::clone(&db));
        let all = tool.execute(json!({"status": "all"}), &ctx).await.unwrap();
        assert_eq!(all.result["count"], 2);

        let done = tool.execute(json!({"status": "done"}), &ctx).await.unwrap();
        assert_eq!(done.result["count"], 1);
        assert_eq!(done.result["tasks"][0]["title"], "b");

        let bad = tool.execute(json!({"status": "someday"}), &ctx).await.unwrap();
        assert_eq!(bad.result["success"], false);
    }

    #[tokio::test]
    async fn search_tasks_matches_description() {
        let (db, ctx) = setup().await;
        db.create_task(ctx.user_id, &NewTask::new("Errands").with_description("pick up MILK"))
            .await
            .unwrap();
        db.create_task(ctx.user_id, &NewTask::new("Gym")).await.unwrap();
        let out = SearchTasksTool::new(db)
            .execute(json!({"query": "milk"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.result["count"], 1);
        assert_eq!(out.result["tasks"][0]["title"], "Errands");
    }

    #[tokio::test]
    async fn update_by_title_normalizes_status() {
        let (db, ctx) = setup().await;
        let task = db.create_task(ctx.user_id, &NewTask::new("Clean house")).await.unwrap();
        let out = UpdateTaskTool::new(Arc::clone(&db))
            .execute(json!({"title": "clean", "status": "in progress"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.result["success"], true);

        let updated = db.get_task(ctx.user_id, task.id).await.unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::InProgress);
        assert_eq!(updated.title, "Clean house");
    }

    #[tokio::test]
    async fn update_by_id_treats_title_as_new_title() {
        let (db, ctx) = setup().await;
        let task = db.create_task(ctx.user_id, &NewTask::new("Old")).await.unwrap();
        UpdateTaskTool::new(Arc::clone(&db))
            .execute(json!({"task_id": task.id, "title": "New"}), &ctx)
            .await
            .unwrap();
        assert_eq!(db.get_task(ctx.user_id, task.id).await.unwrap().unwrap().title, "New");
    }

    #[tokio::test]
    async fn ambiguous_title_lists_candidates() {
        let (db, ctx) = setup().await;
        for i in 0..7 {
            db.create_task(ctx.user_id, &NewTask::new(format!("Report {i}")))
                .await
                .unwrap();
        }
        let out = UpdateTaskTool::new(db)
            .execute(json!({"title": "report", "status": "done"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.result["success"], false);
        assert_eq!(out.result["error"], "Multiple tasks found");
        let message = out.result["message"].as_str().unwrap();
        assert_eq!(message.matches("(ID: ").count(), MAX_LISTED_MATCHES);
    }

    #[tokio::test]
    async fn update_without_changes_fails() {
        let (db, ctx) = setup().await;
        let task = db.create_task(ctx.user_id, &NewTask::new("x")).await.unwrap();
        let out = UpdateTaskTool::new(db)
            .execute(json!({"task_id": task.id}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.result["error"], "No updates provided");
    }

    #[tokio::test]
    async fn complete_task_by_id() {
        let (db, ctx) = setup().await;
        let task = db.create_task(ctx.user_id, &NewTask::new("Ship it")).await.unwrap();
        let out = CompleteTaskTool::new(Arc::clone(&db))
            .execute(json!({"task_id": task.id}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.result["message"], "Task 'Ship it' has been marked as completed!");
        assert!(db.get_task(ctx.user_id, task.id).await.unwrap().unwrap().is_completed());
    }

    #[tokio::test]
    async fn tools_cannot_reach_other_users_tasks() {
        let (db, ctx) = setup().await;
        let other = db.create_user("other@example.com", "h", None).await.unwrap();
        let theirs = db.create_task(other.id, &NewTask::new("Theirs")).await.unwrap();

        let out = DeleteTaskTool::new(Arc::clone(&db))
            .execute(json!({"task_id": theirs.id}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.result["success"], false);
        assert!(db.get_task(other.id, theirs.id).await.unwrap().is_some());

        let by_title = CompleteTaskTool::new(Arc::clone(&db))
            .execute(json!({"title": "Theirs"}), &ctx)
            .await
            .unwrap();
        assert_eq!(by_title.result["error"], "Task not found");
    }

    #[tokio::test]
    async fn delete_by_title() {
        let (db, ctx) = setup().await;
        let task = db.create_task(ctx.user_id, &NewTask::new("Dentist")).await.unwrap();
        let out = DeleteTaskTool::new(Arc::clone(&db))
            .execute(json!({"title": "dent"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out.result["success"], true);
        assert!(db.get_task(ctx.user_id, task.id).await.unwrap().is_none());
    }

    #[test]
    fn priority_parsing() {
        assert_eq!(parse_priority(&json!(2)), Some(Priority::Medium));
        assert_eq!(parse_priority(&json!("Low")), Some(Priority::Low));
        assert_eq!(parse_priority(&json!(9)), None);
    }

    #[tokio::test]
    async fn registers_all_tools() {
        let registry = ToolRegistry::new();
        let (db, _) = setup().await;
        register_task_tools(&registry, db);
        assert_eq!(
            registry.list().await,
            vec![
                "add_task",
                "complete_task",
                "delete_task",
                "list_tasks",
                "search_tasks",
                "update_task"
            ]
        );
    }
}
