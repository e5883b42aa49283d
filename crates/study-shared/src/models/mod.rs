mod attachment;
mod comment;
mod profile;
mod topic;

pub use attachment::*;
pub use comment::*;
pub use profile::*;
pub use topic::*;
