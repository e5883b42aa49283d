mod auth;
mod changes;
mod client;
mod preferences;

pub use changes::{pump_changes, SseParser, StreamEvent};
pub use client::{ApiClient, ApiError};
pub use preferences::{DashboardMode, UserPreferences};
