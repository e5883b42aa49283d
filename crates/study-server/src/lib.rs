//! HTTP service for the study group: topics, schedules, threaded comments
//! and attachments, backed by an external row store, object store and
//! identity provider.

pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod routes;
pub mod upload;

pub use config::Config;
pub use routes::{create_router, AppState};
