//! S3 operation handlers, called by the dispatchers in [`crate::server`]
//! after authentication and the policy check.

pub mod bucket;
pub mod object;
