//! CLI command modules.

pub mod http;
pub mod peer;
pub mod status;
pub mod tasks;
