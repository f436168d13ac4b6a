//! Chat assistant: conversations, the tool-calling chat service and its routes.

pub mod model;
pub mod routes;
pub mod service;

pub use routes::chat_routes;
pub use service::ChatService;
