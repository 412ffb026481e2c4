pub mod auth;
pub mod blobs;
pub mod cache;
pub mod chat;
pub mod connection;
pub mod dispatcher;
pub mod notify;
pub mod presence;

pub use chat::{ChatError, ChatResult, ChatService};
pub use dispatcher::Dispatcher;
