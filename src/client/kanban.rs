//! Kanban board: three status columns and drag-and-drop resolution.

use crate::error::ClientError;
use crate::tasks::model::{Task, TaskStatus};

use super::task_cache::TaskCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub status: TaskStatus,
    pub title: &'static str,
}

/// Board columns, left to right. One per status.
pub const COLUMNS: [Column; 3] = [
    Column {
        status: TaskStatus::Pending,
        title: "To Do",
    },
    Column {
        status: TaskStatus::InProgress,
        title: "In Progress",
    },
    Column {
        status: TaskStatus::Completed,
        title: "Done",
    },
];

pub fn column_for(status: TaskStatus) -> Column {
    match status {
        TaskStatus::Pending => COLUMNS[0],
        TaskStatus::InProgress => COLUMNS[1],
        TaskStatus::Completed => COLUMNS[2],
    }
}

/// Tasks grouped by column. Every task lands in exactly one column and
/// keeps its relative order.
#[derive(Debug, Clone, PartialEq)]
pub struct Board {
    pub columns: Vec<(Column, Vec<Task>)>,
}

impl Board {
    pub fn partition(tasks: &[Task]) -> Self {
        let columns = COLUMNS
            .iter()
            .map(|col| {
                let in_column = tasks
                    .iter()
                    .filter(|t| t.status == col.status)
                    .cloned()
                    .collect();
                (*col, in_column)
            })
            .collect();
        Self { columns }
    }

    pub fn column(&self, status: TaskStatus) -> &[Task] {
        self.columns
            .iter()
            .find(|(col, _)| col.status == status)
            .map(|(_, tasks)| tasks.as_slice())
            .unwrap_or_default()
    }
}

/// What a card was dropped on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    Column(TaskStatus),
    Task(i64),
}

impl DropTarget {
    /// Parse a droppable id: a column status (`"pending"`, `"in-progress"`,
    /// `"completed"`) or a task id.
    pub fn parse(id: &str) -> Option<Self> {
        if let Ok(status) = id.parse::<TaskStatus>() {
            return Some(Self::Column(status));
        }
        id.parse().ok().map(Self::Task)
    }
}

/// The single status change a drop implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub task_id: i64,
    pub status: TaskStatus,
}

/// Work out what a drop means. `None` when nothing should happen: no target,
/// unknown task or target, or a drop within the same column.
pub fn resolve_drop(tasks: &[Task], active_id: i64, over: Option<DropTarget>) -> Option<StatusChange> {
    let active = tasks.iter().find(|t| t.id == active_id)?;
    let target_status = match over? {
        DropTarget::Column(status) => status,
        DropTarget::Task(id) if id == active_id => return None,
        DropTarget::Task(id) => tasks.iter().find(|t| t.id == id)?.status,
    };
    (target_status != active.status).then_some(StatusChange {
        task_id: active.id,
        status: target_status,
    })
}

/// Resolve a drop and, if it moves the card to another column, send the
/// status-only update through the cache.
pub async fn handle_drop(
    cache: &TaskCache,
    tasks: &[Task],
    active_id: i64,
    over: Option<DropTarget>,
) -> Result<Option<Task>, ClientError> {
    let Some(change) = resolve_drop(tasks, active_id, over) else {
        tracing::debug!(active_id, ?over, "Drop ignored");
        return Ok(None);
    };
    let task = cache.set_status(change.task_id, change.status).await?;
    Ok(Some(task))
}
