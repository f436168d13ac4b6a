//! Tasks: data model, validation, filters and REST routes.

pub mod model;
pub mod routes;

pub use model::{
    NewTask, Priority, SortField, SortOrder, StatusUpdate, Task, TaskFilters, TaskPatch,
    TaskStatus, TaskValidationError,
};
pub use routes::task_routes;
