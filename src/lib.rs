//! TaskFlow: task board backend with a tool-calling chat assistant, plus
//! the client-side application logic that drives it.

pub mod api;
pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod llm;
pub mod store;
pub mod tasks;
pub mod tools;
