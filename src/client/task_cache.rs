//! Query cache for task lists with optimistic mutations.
//!
//! Lists are cached per [`TaskFilters`]. A mutation runs in four steps:
//!
//! 1. Cancel in-flight fetches. Bumping the generation makes any response
//!    from a fetch that started earlier get discarded.
//! 2. Snapshot every cached list and apply the change optimistically.
//! 3. Send the request. On failure restore the snapshot and push an error
//!    toast.
//! 4. Either way, refetch every cached list to reconcile with the server.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use tokio::sync::RwLock;

use super::api::TaskApi;
use super::toast::ToastQueue;
use crate::error::ClientError;
use crate::tasks::model::{NewTask, Task, TaskFilters, TaskPatch, TaskStatus};

#[derive(Default)]
struct CacheState {
    lists: HashMap<TaskFilters, Vec<Task>>,
    generation: u64,
}

pub struct TaskCache {
    api: Arc<dyn TaskApi>,
    toasts: Arc<ToastQueue>,
    state: RwLock<CacheState>,
    /// Placeholder ids count down from -1 so they never collide with server ids.
    next_temp_id: AtomicI64,
}

impl TaskCache {
    pub fn new(api: Arc<dyn TaskApi>, toasts: Arc<ToastQueue>) -> Self {
        Self {
            api,
            toasts,
            state: RwLock::new(CacheState::default()),
            next_temp_id: AtomicI64::new(-1),
        }
    }

    /// Cached list for `filters`, fetching it on first use.
    pub async fn tasks(&self, filters: &TaskFilters) -> Result<Vec<Task>, ClientError> {
        if let Some(list) = self.cached(filters).await {
            return Ok(list);
        }
        self.fetch(filters).await
    }

    /// Cached list without touching the network.
    pub async fn cached(&self, filters: &TaskFilters) -> Option<Vec<Task>> {
        self.state.read().await.lists.get(filters).cloned()
    }

    /// Fetch `filters` from the server. The result is stored only if no
    /// mutation started while the request was in flight.
    pub async fn fetch(&self, filters: &TaskFilters) -> Result<Vec<Task>, ClientError> {
        let started = self.state.read().await.generation;
        let tasks = self.api.list_tasks(filters).await?;

        let mut state = self.state.write().await;
        if state.generation == started {
            state.lists.insert(filters.clone(), tasks.clone());
        } else {
            tracing::debug!(?filters, "Discarding stale task list");
        }
        Ok(tasks)
    }

    /// Refetch every cached list.
    pub async fn invalidate_all(&self) {
        let keys: Vec<TaskFilters> = self.state.read().await.lists.keys().cloned().collect();
        for filters in keys {
            if let Err(e) = self.fetch(&filters).await {
                tracing::warn!(?filters, error = %e, "Task refetch failed");
            }
        }
    }

    /// Optimistically add a placeholder task, then create it on the server.
    ///
    /// A blank title is rejected before any network call or cache change.
    pub async fn create(&self, new_task: NewTask) -> Result<Task, ClientError> {
        new_task
            .validate()
            .map_err(|e| ClientError::Validation(e.to_string()))?;

        let placeholder = self.placeholder(&new_task);
        self.mutate(
            |lists| {
                for (filters, list) in lists.iter_mut() {
                    if filters.matches(&placeholder) {
                        list.push(placeholder.clone());
                    }
                }
            },
            self.api.create_task(&new_task),
        )
        .await
    }

    /// Optimistically merge `patch` into the task, then PUT it.
    pub async fn update(&self, id: i64, patch: TaskPatch) -> Result<Task, ClientError> {
        patch
            .validate()
            .map_err(|e| ClientError::Validation(e.to_string()))?;

        self.mutate(
            |lists| {
                for task in lists.values_mut().flat_map(|l| l.iter_mut()) {
                    if task.id == id {
                        task.apply(&patch);
                    }
                }
            },
            self.api.update_task(id, &patch),
        )
        .await
    }

    /// Optimistically change the status, then PATCH only the status.
    pub async fn set_status(&self, id: i64, status: TaskStatus) -> Result<Task, ClientError> {
        self.mutate(
            |lists| {
                for task in lists.values_mut().flat_map(|l| l.iter_mut()) {
                    if task.id == id {
                        task.status = status;
                    }
                }
            },
            self.api.update_status(id, status),
        )
        .await
    }

    /// Optimistically remove the task, then delete it on the server.
    pub async fn delete(&self, id: i64) -> Result<(), ClientError> {
        self.mutate(
            |lists| {
                for list in lists.values_mut() {
                    list.retain(|t| t.id != id);
                }
            },
            self.api.delete_task(id),
        )
        .await
    }

    async fn mutate<T>(
        &self,
        optimistic: impl FnOnce(&mut HashMap<TaskFilters, Vec<Task>>),
        request: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, ClientError> {
        let snapshot = {
            let mut state = self.state.write().await;
            state.generation += 1;
            let snapshot = state.lists.clone();
            optimistic(&mut state.lists);
            snapshot
        };

        let result = request.await;

        if let Err(ref e) = result {
            {
                let mut state = self.state.write().await;
                state.generation += 1;
                state.lists = snapshot;
            }
            tracing::warn!(error = %e, "Task mutation failed, rolled back");
            self.toasts.error(e.to_string()).await;
        }

        self.invalidate_all().await;
        result
    }

    fn placeholder(&self, new_task: &NewTask) -> Task {
        let now = Utc::now();
        Task {
            id: self.next_temp_id.fetch_sub(1, Ordering::Relaxed),
            user_id: 0,
            title: new_task.title.clone(),
            description: new_task.description.clone(),
            priority: new_task.priority,
            due_date: new_task.due_date,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
