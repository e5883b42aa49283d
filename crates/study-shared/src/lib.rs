//! Records and view logic shared by the study group server and terminal client.

pub mod api;
pub mod calendar;
pub mod models;
pub mod projection;
pub mod thread;

pub use models::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Unknown category: {0}")]
    Category(String),

    #[error("Unknown sort order: {0}")]
    SortOrder(String),

    #[error("Invalid month (expected YYYY-MM): {0}")]
    Month(String),
}
