//! HTTP route handlers.

pub mod status;
pub mod users;
