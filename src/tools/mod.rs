//! Tool abstraction for the chat assistant.

pub mod builtin;
pub mod registry;
pub mod tool;

pub use registry::ToolRegistry;
pub use tool::*;
