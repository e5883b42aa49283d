mod auth;
mod calendar;
mod changes;
mod comments;
mod topics;

pub use auth::*;
pub use calendar::*;
pub use changes::*;
pub use comments::*;
pub use topics::*;
