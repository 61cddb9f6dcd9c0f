//! Logging setup and identity-library log forwarding.
//!
//! Tokens are never logged or displayed in full; use [`mask_token`].

use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding the tracing filter directive.
pub const LOG_ENV: &str = "PANEAUTH_LOG";

const DEFAULT_FILTER: &str = "warn";

/// Installs a `fmt` subscriber writing to stderr, filtered by `PANEAUTH_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .unwrap_or_else(|_| EnvFilter::new("off"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Log levels used by the identity library's logger callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityLogLevel {
    Error,
    Warning,
    Info,
    Verbose,
    Trace,
}

/// Forwards one identity-library log line into tracing.
///
/// Lines flagged as containing PII are dropped. Returns whether the line
/// was forwarded.
pub fn forward_identity_log(level: IdentityLogLevel, message: &str, contains_pii: bool) -> bool {
    if contains_pii {
        return false;
    }
    match level {
        IdentityLogLevel::Error => tracing::error!(target: "paneauth::identity", "{message}"),
        IdentityLogLevel::Warning => tracing::warn!(target: "paneauth::identity", "{message}"),
        IdentityLogLevel::Info => tracing::info!(target: "paneauth::identity", "{message}"),
        IdentityLogLevel::Verbose => tracing::debug!(target: "paneauth::identity", "{message}"),
        IdentityLogLevel::Trace => return false,
    }
    true
}

/// The identity library's logger callback: level, message, contains-PII.
pub type IdentityLogger = Arc<dyn Fn(IdentityLogLevel, &str, bool) + Send + Sync>;

/// Logger callback that forwards through [`forward_identity_log`].
pub fn tracing_logger() -> IdentityLogger {
    Arc::new(|level: IdentityLogLevel, message: &str, contains_pii: bool| {
        forward_identity_log(level, message, contains_pii);
    })
}

/// Returns a masked version of a token for display (first 12 chars + ...).
pub fn mask_token(token: &str) -> String {
    if token.len() <= 16 {
        return "***".to_string();
    }
    match token.get(..12) {
        Some(prefix) => format!("{prefix}..."),
        None => "***".to_string(),
    }
}
