//! Built-in task management tools.

pub mod task;

pub use task::register_task_tools;
