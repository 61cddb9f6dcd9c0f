//! Cross-window dialog protocol.
//!
//! The dialog page sends exactly one JSON text message to its opener:
//! `{"token": "..."}` on success or `{"error": "..."}` on failure. The
//! opener learns what to do from URL parameters on the dialog page:
//! `logout=1` or `accountContext=<url-encoded JSON>`.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use url::Url;

use crate::account::AccountContext;
use crate::host::{DialogEvent, DialogHandle};

/// Query parameter forcing a logout redirect in the dialog.
pub const LOGOUT_PARAM: &str = "logout";
/// Query parameter carrying the JSON account context.
pub const ACCOUNT_CONTEXT_PARAM: &str = "accountContext";

/// Message relayed from the dialog to its opener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DialogMessage {
    Token { token: String },
    Error { error: String },
}

/// A dialog message that does not carry exactly one of `token` / `error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogMessageError(pub String);

impl fmt::Display for DialogMessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed dialog message: {}", self.0)
    }
}

impl std::error::Error for DialogMessageError {}

#[derive(Deserialize)]
struct RawDialogMessage {
    token: Option<String>,
    error: Option<String>,
}

impl DialogMessage {
    pub fn token(token: impl Into<String>) -> Self {
        DialogMessage::Token {
            token: token.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        DialogMessage::Error {
            error: error.into(),
        }
    }

    /// Parses the JSON text received from the dialog.
    ///
    /// # Errors
    /// Returns an error if the text is not JSON or carries both or neither field.
    pub fn parse(text: &str) -> Result<Self, DialogMessageError> {
        let raw: RawDialogMessage =
            serde_json::from_str(text).map_err(|e| DialogMessageError(e.to_string()))?;
        match (raw.token, raw.error) {
            (Some(token), None) => Ok(DialogMessage::Token { token }),
            (None, Some(error)) => Ok(DialogMessage::Error { error }),
            (Some(_), Some(_)) => Err(DialogMessageError(
                "both token and error are present".to_string(),
            )),
            (None, None) => Err(DialogMessageError(
                "neither token nor error is present".to_string(),
            )),
        }
    }

    /// JSON text for `message_parent`.
    pub fn to_json(&self) -> String {
        // Two string-keyed variants: serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// What the dialog page was opened to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogLaunch {
    Logout,
    Login { context: Option<AccountContext> },
}

impl DialogLaunch {
    /// Reads the launch parameters from the dialog page URL.
    ///
    /// A malformed `accountContext` is treated as absent.
    pub fn from_url(url: &Url) -> Self {
        let param = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        };

        if param(LOGOUT_PARAM).as_deref() == Some("1") {
            return DialogLaunch::Logout;
        }

        let context = param(ACCOUNT_CONTEXT_PARAM).and_then(|raw| {
            match AccountContext::from_json(&raw) {
                Ok(ctx) => Some(ctx),
                Err(e) => {
                    tracing::warn!("ignoring malformed {ACCOUNT_CONTEXT_PARAM}: {e:#}");
                    None
                }
            }
        });
        DialogLaunch::Login { context }
    }
}

/// Dialog page URL for a login relay carrying `context`.
///
/// # Errors
/// Returns an error if the context cannot be serialized.
pub fn login_url(dialog_page: &Url, context: &AccountContext) -> anyhow::Result<Url> {
    let mut url = dialog_page.clone();
    url.query_pairs_mut()
        .clear()
        .append_pair(ACCOUNT_CONTEXT_PARAM, &context.to_json()?);
    Ok(url)
}

/// Dialog page URL forcing a logout redirect.
pub fn logout_url(dialog_page: &Url) -> Url {
    let mut url = dialog_page.clone();
    url.query_pairs_mut().clear().append_pair(LOGOUT_PARAM, "1");
    url
}

/// How a relay wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Message(DialogMessage),
    /// The dialog sent text that is not a valid message
    Malformed(DialogMessageError),
    /// The dialog closed (or its handler was dropped) without a message
    Cancelled,
}

/// One-shot bridge from a dialog's event handler to an awaiting opener.
///
/// The first event resolves the wait; later events are ignored. When the
/// first event is a message the dialog is closed exactly once. A channel
/// dropped before any event arrived closes the dialog it still holds.
pub struct RelayChannel {
    dialog: Option<Box<dyn DialogHandle>>,
    rx: oneshot::Receiver<DialogEvent>,
}

impl RelayChannel {
    /// Registers the completion handler on `dialog`.
    pub fn attach(dialog: Box<dyn DialogHandle>) -> Self {
        let (tx, rx) = oneshot::channel();
        let pending = Arc::new(Mutex::new(Some(tx)));
        dialog.add_event_handler(Box::new(move |event| {
            let sender = pending.lock().ok().and_then(|mut slot| slot.take());
            if let Some(sender) = sender {
                let _ = sender.send(event);
            }
        }));
        Self {
            dialog: Some(dialog),
            rx,
        }
    }

    /// Waits for the dialog's single event. There is no timeout.
    pub async fn wait(mut self) -> RelayOutcome {
        let event = (&mut self.rx).await;
        match event {
            Ok(DialogEvent::Message(text)) => {
                if let Some(dialog) = self.dialog.take() {
                    dialog.close();
                }
                match DialogMessage::parse(&text) {
                    Ok(message) => RelayOutcome::Message(message),
                    Err(e) => RelayOutcome::Malformed(e),
                }
            }
            Ok(DialogEvent::Closed) | Err(_) => {
                // Already gone on the host side.
                self.dialog = None;
                RelayOutcome::Cancelled
            }
        }
    }
}

impl Drop for RelayChannel {
    fn drop(&mut self) {
        if let Some(dialog) = self.dialog.take() {
            tracing::debug!("relay wait abandoned, closing dialog");
            dialog.close();
        }
    }
}
