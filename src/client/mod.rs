//! Client library: the application logic a TaskFlow front end binds to.
//!
//! [`ApiClient`] talks to the server; [`TaskCache`] and [`ChatController`]
//! hold the state a UI renders and expose the operations it triggers.

pub mod api;
pub mod chat;
pub mod chat_store;
pub mod form;
pub mod kanban;
pub mod session;
pub mod task_cache;
pub mod toast;

pub use api::{ApiClient, ChatApi, TaskApi};
pub use chat::{ChatController, TaskRefresh};
pub use chat_store::{ChatAction, ChatState, ChatStore, ConversationId};
pub use form::TaskForm;
pub use kanban::{Board, COLUMNS, DropTarget};
pub use session::{AuthSession, LogoutReason};
pub use task_cache::TaskCache;
pub use toast::{Toast, ToastKind, ToastQueue};
