pub mod attachments;
pub mod auth;
pub mod calendar;
pub mod changes;
pub mod comments;
pub mod health;
pub mod topics;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;

/// Current time in the form written to `updated_at` columns.
pub(crate) fn timestamp() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}
