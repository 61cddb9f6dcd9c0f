//! CLI command handlers.

pub mod config;
pub mod dialog_url;
pub mod simulate;
