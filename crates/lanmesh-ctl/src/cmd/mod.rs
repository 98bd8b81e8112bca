//! CLI command modules.

pub mod hosts;
pub mod http;
pub mod push;
