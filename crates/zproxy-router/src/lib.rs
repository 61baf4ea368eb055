//! HTTP surface: the OpenAI-compatible API plus the pool admin
//! endpoints.

pub mod admin;
pub mod proxy;

pub use admin::admin_router;
pub use proxy::{AppState, api_router};
