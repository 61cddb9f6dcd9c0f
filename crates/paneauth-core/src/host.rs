//! Host integration boundary (the Office runtime as seen by the add-in).
//!
//! The host supplies identity hints, answers capability queries and owns the
//! modal dialog surface. Dialog events arrive through a registered handler,
//! mirroring the host's callback API; the orchestrator bridges that handler
//! into a one-shot channel.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use url::Url;

/// Requirement set advertised by hosts that support nested app authentication.
pub const NESTED_APP_AUTH: &str = "NestedAppAuth";

/// Async result of a host call.
pub type HostFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, HostError>> + Send + 'a>>;

/// Identity hints supplied by the host for the signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostAuthContext {
    pub login_hint: Option<String>,
    pub tenant_id: Option<String>,
    pub user_object_id: Option<String>,
}

/// Failure reported by the host runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    /// Host-specific numeric code, when present (e.g. 12006 for a dialog the user closed)
    pub code: Option<u32>,
    pub message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: u32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "host error {code}: {}", self.message),
            None => write!(f, "host error: {}", self.message),
        }
    }
}

impl std::error::Error for HostError {}

/// Event delivered by an open dialog to its opener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogEvent {
    /// Raw text the dialog page sent with `message_parent`
    Message(String),
    /// The dialog went away (user closed it, navigation error)
    Closed,
}

pub type DialogEventHandler = Box<dyn Fn(DialogEvent) + Send + Sync>;

/// Handle to an open dialog window.
pub trait DialogHandle: Send + Sync {
    /// Registers the handler invoked for every event the dialog raises.
    fn add_event_handler(&self, handler: DialogEventHandler);

    /// Closes the dialog window.
    fn close(&self);
}

/// Host capabilities consumed by the taskpane page.
pub trait HostIntegration: Send + Sync {
    /// Identity hints for the signed-in user. May fail on hosts without the API.
    fn auth_context(&self) -> HostFuture<'_, HostAuthContext>;

    /// Whether the host supports the named requirement set.
    fn is_set_supported(&self, requirement_set: &str) -> bool;

    /// Opens a modal dialog at `url`.
    fn display_dialog(&self, url: &Url) -> HostFuture<'_, Box<dyn DialogHandle>>;

    fn supports_nested_app_auth(&self) -> bool {
        self.is_set_supported(NESTED_APP_AUTH)
    }
}

/// Host capability available inside a dialog page: talking to the opener.
pub trait ParentChannel: Send + Sync {
    fn message_parent(&self, message: &str) -> HostFuture<'_, ()>;
}
