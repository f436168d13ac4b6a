//! REST endpoints for the authenticated user's tasks.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::{Json, Router};
use tracing::info;

use super::model::{NewTask, StatusUpdate, Task, TaskFilters, TaskPatch, TaskStatus};
use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, DatabaseError};

fn not_found(id: i64) -> ApiError {
    DatabaseError::NotFound {
        entity: "Task".to_string(),
        id: id.to_string(),
    }
    .into()
}

async fn load(state: &AppState, user_id: i64, id: i64) -> Result<Task, ApiError> {
    state
        .db
        .get_task(user_id, id)
        .await?
        .ok_or_else(|| not_found(id))
}

/// GET /api/v1/tasks
async fn list_tasks(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(filters): Query<TaskFilters>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let tasks = state.db.list_tasks(user.id, &filters).await?;
    Ok(Json(tasks))
}

/// POST /api/v1/tasks
async fn create_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(new_task): Json<NewTask>,
) -> Result<Json<Task>, ApiError> {
    new_task.validate()?;
    let task = state.db.create_task(user.id, &new_task).await?;
    info!(task_id = task.id, user_id = user.id, "Task created");
    Ok(Json(task))
}

/// GET /api/v1/tasks/{id}
async fn get_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(load(&state, user.id, id).await?))
}

/// PUT /api/v1/tasks/{id}: apply the fields present in the body.
async fn update_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    Json(patch): Json<TaskPatch>,
) -> Result<Json<Task>, ApiError> {
    patch.validate()?;
    let mut task = load(&state, user.id, id).await?;
    task.apply(&patch);
    state.db.update_task(&task).await?;
    info!(task_id = id, "Task updated");
    Ok(Json(task))
}

/// PATCH /api/v1/tasks/{id}: change only the status.
async fn update_status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<Task>, ApiError> {
    let mut task = load(&state, user.id, id).await?;
    task.apply(&TaskPatch::status(update.status));
    state.db.update_task(&task).await?;
    info!(task_id = id, status = %update.status, "Task status changed");
    Ok(Json(task))
}

/// PATCH /api/v1/tasks/{id}/complete
async fn complete_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Task>, ApiError> {
    let mut task = load(&state, user.id, id).await?;
    task.apply(&TaskPatch::status(TaskStatus::Completed));
    state.db.update_task(&task).await?;
    info!(task_id = id, "Task completed");
    Ok(Json(task))
}

/// DELETE /api/v1/tasks/{id}
async fn delete_task(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if !state.db.delete_task(user.id, id).await? {
        return Err(not_found(id));
    }
    info!(task_id = id, "Task deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Build the task REST routes.
pub fn task_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/v1/tasks/{id}",
            get(get_task)
                .put(update_task)
                .patch(update_status)
                .delete(delete_task),
        )
        .route("/api/v1/tasks/{id}/complete", patch(complete_task))
        .with_state(state)
}
