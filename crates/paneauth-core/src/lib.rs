//! Core paneauth library (account context, token requests, identity gateway,
//! fallback orchestration, dialog relay).

pub mod account;
pub mod config;
pub mod dialog;
pub mod error;
pub mod gateway;
pub mod host;
pub mod logging;
pub mod orchestrator;
pub mod relay;
pub mod request;
pub mod sim;
pub mod taskpane;
